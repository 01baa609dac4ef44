//! Event types emitted by the geolocation pipeline
//!
//! Zone events are the pipeline's output stream; system events report
//! source lifecycle changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Zone;

/// Event envelope for all system events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            payload,
        }
    }

    pub fn zone_created(zone: Zone, frame_sequence: u64) -> Self {
        Self::new(
            EventType::ZoneCreated,
            EventPayload::Zone(ZoneEvent {
                zone,
                frame_sequence,
            }),
        )
    }

    pub fn zone_updated(zone: Zone, frame_sequence: u64) -> Self {
        Self::new(
            EventType::ZoneUpdated,
            EventPayload::Zone(ZoneEvent {
                zone,
                frame_sequence,
            }),
        )
    }

    pub fn system(
        event_type: EventType,
        component: impl Into<String>,
        status: impl Into<String>,
        message: Option<String>,
    ) -> Self {
        Self::new(
            event_type,
            EventPayload::System(SystemEvent {
                component: component.into(),
                status: status.into(),
                message,
            }),
        )
    }

    /// The zone carried by a zone event
    pub fn zone(&self) -> Option<&Zone> {
        match &self.payload {
            EventPayload::Zone(z) => Some(&z.zone),
            EventPayload::System(_) => None,
        }
    }
}

/// Type of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ZoneCreated,
    ZoneUpdated,
    SourceConnected,
    StreamEnded,
    PipelineStopped,
}

/// Event payload variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    Zone(ZoneEvent),
    System(SystemEvent),
}

/// Zone creation or update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneEvent {
    pub zone: Zone,
    /// Sequence number of the frame that produced the sighting
    pub frame_sequence: u64,
}

/// Component lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub component: String,
    pub status: String,
    pub message: Option<String>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeoPoint;

    #[test]
    fn test_event_creation() {
        let zone = Zone::new(1, &GeoPoint::new(34.5, 69.2));
        let event = Event::zone_created(zone, 12);

        assert_eq!(event.event_type, EventType::ZoneCreated);
        assert_eq!(event.zone().map(|z| z.id), Some(1));
    }

    #[test]
    fn test_event_serialization() {
        let zone = Zone::new(3, &GeoPoint::new(34.5553, 69.2075).with_color("red"));
        let event = Event::zone_updated(zone, 99);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ZONE_UPDATED"));

        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_type, EventType::ZoneUpdated);
        assert_eq!(deserialized.zone().and_then(|z| z.color_class.clone()).as_deref(), Some("red"));
    }

    #[test]
    fn test_system_event_has_no_zone() {
        let event = Event::system(EventType::StreamEnded, "frame-source", "ENDED", None);
        assert!(event.zone().is_none());
    }
}
