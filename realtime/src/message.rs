//! Wire protocol for the emergency WebSocket channel.
//!
//! JSON text frames, camelCase field names. Client frames carry an optional
//! client-assigned `seq` that is echoed in the matching ack, standing in for
//! socket.io's per-message ack callback.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use events::Id;

/// Trait for getting the wire event type name
pub trait EventType {
    fn event_type(&self) -> &'static str;
}

/// A frame received from a client.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    /// Client-assigned correlation id echoed back in the ack.
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub request: ClientRequest,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientRequest {
    #[serde(rename = "location:update")]
    LocationUpdate { latitude: f64, longitude: f64 },

    #[serde(rename = "emergency:subscribe")]
    EmergencySubscribe,

    #[serde(rename = "emergency:unsubscribe")]
    EmergencyUnsubscribe,

    #[serde(rename = "emergency:raise")]
    EmergencyRaise {
        latitude: f64,
        longitude: f64,
        /// Reported GPS accuracy in meters; accepted and ignored.
        #[serde(default)]
        accuracy: Option<f64>,
        /// Optional base64 image snapshot.
        #[serde(default)]
        image: Option<String>,
    },

    #[serde(rename = "emergency:cancel")]
    EmergencyCancel {
        #[serde(rename = "emergencyId")]
        emergency_id: Id,
    },
}

/// Payload of an `emergency:nearby` frame, used both for live fan-out and
/// for subscribe-time resync.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyPayload {
    pub emergency_id: Id,
    pub owner_id: Id,
    pub latitude: f64,
    pub longitude: f64,
    pub expires_at: DateTime<FixedOffset>,
    /// Haversine distance from the origin to this recipient, meters.
    pub distance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "nearestAEDs")]
    pub nearest_aeds: Value,
    #[serde(rename = "aiSummary", skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<Value>,
    /// Requester snapshot: identity, contact, medical profile, skills.
    pub requester: Value,
}

/// A frame sent to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "emergency:nearby")]
    EmergencyNearby(NearbyPayload),

    #[serde(rename = "emergency:cancelled")]
    EmergencyCancelled {
        #[serde(rename = "emergencyId")]
        emergency_id: Id,
        #[serde(rename = "ownerId")]
        owner_id: Id,
    },

    /// Follow-up event carrying the resolved AI triage assessment.
    #[serde(rename = "emergency:assessment")]
    EmergencyAssessment {
        #[serde(rename = "emergencyId")]
        emergency_id: Id,
        #[serde(rename = "ownerId")]
        owner_id: Id,
        assessment: Value,
    },

    #[serde(rename = "ack")]
    Ack(Ack),
}

impl EventType for ServerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::EmergencyNearby(_) => "emergency:nearby",
            ServerEvent::EmergencyCancelled { .. } => "emergency:cancelled",
            ServerEvent::EmergencyAssessment { .. } => "emergency:assessment",
            ServerEvent::Ack(_) => "ack",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Acknowledgement for a client request. Operation-specific fields (raise
/// receipts) are flattened into the body.
#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub status: AckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Operation-specific fields; `None` flattens to nothing.
    #[serde(flatten)]
    pub body: Option<Value>,
}

impl Ack {
    pub fn ok(seq: Option<u64>) -> Self {
        Self {
            seq,
            status: AckStatus::Ok,
            message: None,
            body: None,
        }
    }

    pub fn ok_with(seq: Option<u64>, body: Value) -> Self {
        Self {
            seq,
            status: AckStatus::Ok,
            message: None,
            body: Some(body),
        }
    }

    pub fn error(seq: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            seq,
            status: AckStatus::Error,
            message: Some(message.into()),
            body: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_raise_frame_parses_with_optional_fields_missing() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"event": "emergency:raise", "seq": 7,
                "data": {"latitude": 1.30, "longitude": 103.80}}"#,
        )
        .unwrap();

        assert_eq!(frame.seq, Some(7));
        assert_eq!(
            frame.request,
            ClientRequest::EmergencyRaise {
                latitude: 1.30,
                longitude: 103.80,
                accuracy: None,
                image: None,
            }
        );
    }

    #[test]
    fn client_subscribe_frame_parses_without_data() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"event": "emergency:subscribe"}"#).unwrap();

        assert_eq!(frame.seq, None);
        assert_eq!(frame.request, ClientRequest::EmergencySubscribe);
    }

    #[test]
    fn client_cancel_frame_uses_camel_case_id() {
        let id = Id::new_v4();
        let frame: ClientFrame = serde_json::from_str(&format!(
            r#"{{"event": "emergency:cancel", "data": {{"emergencyId": "{id}"}}}}"#
        ))
        .unwrap();

        assert_eq!(frame.request, ClientRequest::EmergencyCancel { emergency_id: id });
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let result: Result<ClientFrame, _> = serde_json::from_str(
            r#"{"event": "location:update", "data": {"latitude": "north"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn nearby_event_serializes_with_client_facing_field_names() {
        let event = ServerEvent::EmergencyNearby(NearbyPayload {
            emergency_id: Id::new_v4(),
            owner_id: Id::new_v4(),
            latitude: 1.30,
            longitude: 103.80,
            expires_at: chrono::Utc::now().into(),
            distance: 2000.0,
            image: None,
            nearest_aeds: json!([]),
            ai_summary: None,
            requester: json!({"name": "Dominic Chia"}),
        });

        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "emergency:nearby");
        let data = &value["data"];
        assert!(data.get("emergencyId").is_some());
        assert!(data.get("ownerId").is_some());
        assert!(data.get("expiresAt").is_some());
        assert!(data.get("nearestAEDs").is_some());
        // Absent optional fields are omitted, not null.
        assert!(data.get("aiSummary").is_none());
        assert!(data.get("image").is_none());
    }

    #[test]
    fn ack_flattens_the_operation_body() {
        let ack = Ack::ok_with(
            Some(3),
            json!({"emergencyId": "abc", "nearestAEDs": []}),
        );
        let value: Value =
            serde_json::to_value(ServerEvent::Ack(ack)).unwrap();

        assert_eq!(value["event"], "ack");
        assert_eq!(value["data"]["status"], "ok");
        assert_eq!(value["data"]["seq"], 3);
        assert_eq!(value["data"]["emergencyId"], "abc");
    }

    #[test]
    fn error_ack_carries_the_message() {
        let value: Value = serde_json::to_value(ServerEvent::Ack(Ack::error(
            None,
            "Latitude and longitude are required",
        )))
        .unwrap();

        assert_eq!(value["data"]["status"], "error");
        assert_eq!(
            value["data"]["message"],
            "Latitude and longitude are required"
        );
        assert!(value["data"].get("seq").is_none());
    }
}
