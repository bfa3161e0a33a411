// src/geofence/event.rs
//! Transition events and their transport-neutral payload

use super::region::Transition;
use crate::error::{GeofenceError, Result};
use crate::gps::Fix;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `transitionType` carried by error events
pub const TRANSITION_UNSET: i32 = -1;

/// `errorCode` meaning "no error"; never emitted, treated as absent on decode
pub const STATUS_SUCCESS: i32 = 0;

/// Error codes carried by error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// No provider is enabled or the provider went away
    NotAvailable,
    TooManyGeofences,
    TooManyPendingIntents,
    InsufficientPermissions,
    RequestTooFrequent,
    /// Fixes arrived faster than they could be evaluated
    Overrun,
}

impl StatusCode {
    pub const fn code(self) -> i32 {
        match self {
            StatusCode::NotAvailable => 1000,
            StatusCode::TooManyGeofences => 1001,
            StatusCode::TooManyPendingIntents => 1002,
            StatusCode::InsufficientPermissions => 1003,
            StatusCode::RequestTooFrequent => 1004,
            StatusCode::Overrun => 1005,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1000 => Some(StatusCode::NotAvailable),
            1001 => Some(StatusCode::TooManyGeofences),
            1002 => Some(StatusCode::TooManyPendingIntents),
            1003 => Some(StatusCode::InsufficientPermissions),
            1004 => Some(StatusCode::RequestTooFrequent),
            1005 => Some(StatusCode::Overrun),
            _ => None,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::NotAvailable => "GEOFENCE_NOT_AVAILABLE",
            StatusCode::TooManyGeofences => "GEOFENCE_TOO_MANY_GEOFENCES",
            StatusCode::TooManyPendingIntents => "GEOFENCE_TOO_MANY_PENDING_INTENTS",
            StatusCode::InsufficientPermissions => "GEOFENCE_INSUFFICIENT_PERMISSIONS",
            StatusCode::RequestTooFrequent => "GEOFENCE_REQUEST_TOO_FREQUENT",
            StatusCode::Overrun => "GEOFENCE_OVERRUN",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// What the monitor hands to a dispatch sink.
///
/// A transition event always names at least one region; DWELL is never
/// produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionEvent {
    Transition {
        transition: Transition,
        region_ids: Vec<String>,
        location: Fix,
    },
    Error {
        code: StatusCode,
    },
}

impl TransitionEvent {
    pub fn transition(transition: Transition, region_ids: Vec<String>, location: Fix) -> Result<Self> {
        if transition == Transition::Dwell {
            return Err(GeofenceError::Other("DWELL events are not produced".to_string()));
        }
        if region_ids.is_empty() {
            return Err(GeofenceError::Other(
                "transition event needs at least one region".to_string(),
            ));
        }
        Ok(TransitionEvent::Transition {
            transition,
            region_ids,
            location,
        })
    }

    pub fn error(code: StatusCode) -> Self {
        TransitionEvent::Error { code }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TransitionEvent::Error { .. })
    }

    /// Integer transition type; [`TRANSITION_UNSET`] for error events
    pub fn transition_type(&self) -> i32 {
        match self {
            TransitionEvent::Transition { transition, .. } => transition.code(),
            TransitionEvent::Error { .. } => TRANSITION_UNSET,
        }
    }

    pub fn region_ids(&self) -> &[String] {
        match self {
            TransitionEvent::Transition { region_ids, .. } => region_ids,
            TransitionEvent::Error { .. } => &[],
        }
    }

    pub fn location(&self) -> Option<&Fix> {
        match self {
            TransitionEvent::Transition { location, .. } => Some(location),
            TransitionEvent::Error { .. } => None,
        }
    }

    pub fn error_code(&self) -> Option<StatusCode> {
        match self {
            TransitionEvent::Error { code } => Some(*code),
            TransitionEvent::Transition { .. } => None,
        }
    }

    pub fn to_payload(&self) -> EventPayload {
        EventPayload {
            transition_type: self.transition_type(),
            region_ids: self.region_ids().to_vec(),
            location: self.location().cloned(),
            error_code: self.error_code().map(StatusCode::code),
        }
    }

    pub fn from_payload(payload: EventPayload) -> Result<Self> {
        match payload.error_code.filter(|code| *code != STATUS_SUCCESS) {
            Some(code) => {
                let code = StatusCode::from_code(code)
                    .ok_or_else(|| GeofenceError::Decode(format!("unknown error code {}", code)))?;
                if payload.transition_type != TRANSITION_UNSET {
                    return Err(GeofenceError::Decode(format!(
                        "error event has transition type {}",
                        payload.transition_type
                    )));
                }
                if !payload.region_ids.is_empty() {
                    return Err(GeofenceError::Decode(
                        "error event must not name regions".to_string(),
                    ));
                }
                Ok(TransitionEvent::Error { code })
            }
            None => {
                let transition = match Transition::from_code(payload.transition_type) {
                    Some(Transition::Dwell) => {
                        return Err(GeofenceError::Decode("DWELL events are not supported".to_string()))
                    }
                    Some(transition) => transition,
                    None => {
                        return Err(GeofenceError::Decode(format!(
                            "unknown transition type {}",
                            payload.transition_type
                        )))
                    }
                };
                let location = payload.location.ok_or_else(|| {
                    GeofenceError::Decode("transition event without location".to_string())
                })?;
                if payload.region_ids.is_empty() {
                    return Err(GeofenceError::Decode(
                        "transition event without regions".to_string(),
                    ));
                }
                Ok(TransitionEvent::Transition {
                    transition,
                    region_ids: payload.region_ids,
                    location,
                })
            }
        }
    }
}

impl fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionEvent::Transition {
                transition,
                region_ids,
                location,
            } => write!(
                f,
                "{} [{}] at ({:.6}, {:.6})",
                transition,
                region_ids.join(", "),
                location.latitude,
                location.longitude
            ),
            TransitionEvent::Error { code } => write!(f, "ERROR {}", code),
        }
    }
}

/// Wire form of a [`TransitionEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub transition_type: i32,
    #[serde(default)]
    pub region_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Fix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
}

/// Encode an event as a JSON payload.
pub fn encode(event: &TransitionEvent) -> Result<String> {
    Ok(serde_json::to_string(&event.to_payload())?)
}

/// Decode a JSON payload produced by [`encode`] (or any conforming producer).
pub fn decode(payload: &str) -> Result<TransitionEvent> {
    let payload: EventPayload = serde_json::from_str(payload)
        .map_err(|e| GeofenceError::Decode(format!("malformed event payload: {}", e)))?;
    TransitionEvent::from_payload(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn fix() -> Fix {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        Fix::new(38.897_712_345, -77.036_518_9, 4.7, ts).with_altitude(17.25)
    }

    #[test]
    fn test_round_trip() {
        let events = vec![
            TransitionEvent::transition(Transition::Enter, vec!["home".into()], fix()).unwrap(),
            TransitionEvent::transition(
                Transition::Exit,
                vec!["a".into(), "b".into()],
                Fix::new(-33.8688, 151.2093, 12.0, Utc::now()),
            )
            .unwrap(),
            TransitionEvent::error(StatusCode::NotAvailable),
            TransitionEvent::error(StatusCode::Overrun),
        ];

        for event in events {
            let encoded = encode(&event).unwrap();
            assert_eq!(decode(&encoded).unwrap(), event, "payload {}", encoded);
        }
    }

    #[test]
    fn test_payload_shape() {
        let event = TransitionEvent::transition(Transition::Enter, vec!["home".into()], fix()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&encode(&event).unwrap()).unwrap();
        assert_eq!(value["transitionType"], 1);
        assert_eq!(value["regionIds"][0], "home");
        assert_eq!(value["location"]["lat"], 38.897_712_345);
        assert!(value.get("errorCode").is_none());

        let error = TransitionEvent::error(StatusCode::NotAvailable);
        let value: serde_json::Value = serde_json::from_str(&encode(&error).unwrap()).unwrap();
        assert_eq!(value["transitionType"], -1);
        assert_eq!(value["regionIds"].as_array().unwrap().len(), 0);
        assert_eq!(value["errorCode"], 1000);
        assert!(value.get("location").is_none());
    }

    #[test]
    fn test_constructor_rejects_empty_and_dwell() {
        assert!(TransitionEvent::transition(Transition::Enter, vec![], fix()).is_err());
        assert!(TransitionEvent::transition(Transition::Dwell, vec!["x".into()], fix()).is_err());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let cases = [
            r#"{"transitionType":1,"regionIds":[]}"#,
            r#"{"transitionType":1,"regionIds":["home"]}"#,
            r#"{"transitionType":4,"regionIds":["home"],"location":{"lat":0,"lon":0,"accuracy":1,"timestamp":"2024-05-01T12:00:00Z"}}"#,
            r#"{"transitionType":7,"regionIds":["home"],"location":{"lat":0,"lon":0,"accuracy":1,"timestamp":"2024-05-01T12:00:00Z"}}"#,
            r#"{"transitionType":-1,"regionIds":["home"],"errorCode":1000}"#,
            r#"{"transitionType":-1,"regionIds":[],"errorCode":42}"#,
            r#"{"transitionType":-1,"regionIds":[]}"#,
            r#"not json"#,
        ];

        for case in cases {
            assert!(
                matches!(decode(case), Err(GeofenceError::Decode(_))),
                "accepted {}",
                case
            );
        }
    }

    #[test]
    fn test_zero_error_code_means_success() {
        let payload = r#"{"transitionType":2,"regionIds":["home"],"location":{"lat":1.5,"lon":2.5,"accuracy":3,"timestamp":"2024-05-01T12:00:00Z"},"errorCode":0}"#;
        let event = decode(payload).unwrap();
        assert_eq!(event.transition_type(), 2);
        assert!(event.error_code().is_none());
    }
}
