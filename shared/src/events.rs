//! Realtime event vocabulary
//!
//! Server-pushed events and client-emitted events are closed enumerations so
//! subscribers and emitters are checked against the fixed set of names the
//! backend understands.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Errors raised while turning a wire event into a typed event
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Invalid payload for {event}: {source}")]
    InvalidPayload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Every event a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Link established (local lifecycle event)
    Connect,
    /// Link lost (local lifecycle event)
    Disconnect,
    /// Connection attempt failed (local lifecycle event)
    ConnectError,
    AdminConnected,
    StudentScanned,
    StudentAdded,
    StudentUpdated,
    StudentDeleted,
    StudentStatusChanged,
    SchoolAdded,
    SchoolUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::ConnectError,
        EventKind::AdminConnected,
        EventKind::StudentScanned,
        EventKind::StudentAdded,
        EventKind::StudentUpdated,
        EventKind::StudentDeleted,
        EventKind::StudentStatusChanged,
        EventKind::SchoolAdded,
        EventKind::SchoolUpdated,
    ];

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::ConnectError => "connect_error",
            EventKind::AdminConnected => "admin:connected",
            EventKind::StudentScanned => "student:scanned",
            EventKind::StudentAdded => "student:added",
            EventKind::StudentUpdated => "student:updated",
            EventKind::StudentDeleted => "student:deleted",
            EventKind::StudentStatusChanged => "student:status-changed",
            EventKind::SchoolAdded => "school:added",
            EventKind::SchoolUpdated => "school:updated",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Lifecycle events are raised locally and never arrive as event packets
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            EventKind::Connect | EventKind::Disconnect | EventKind::ConnectError
        )
    }
}

/// `{ studentId, isActive }` carried by status change events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStatus {
    pub student_id: String,
    pub is_active: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentRef {
    student_id: String,
}

#[derive(Deserialize)]
struct AdminInfo {
    #[serde(default)]
    username: String,
}

/// An event delivered to listeners
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connect { socket_id: String },
    Disconnect { reason: String },
    ConnectError { message: String },
    AdminConnected { username: String },
    StudentScanned(Value),
    StudentAdded(Value),
    StudentUpdated(Value),
    StudentDeleted { student_id: String },
    StudentStatusChanged(StudentStatus),
    SchoolAdded(Value),
    SchoolUpdated(Value),
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Connect { .. } => EventKind::Connect,
            ServerEvent::Disconnect { .. } => EventKind::Disconnect,
            ServerEvent::ConnectError { .. } => EventKind::ConnectError,
            ServerEvent::AdminConnected { .. } => EventKind::AdminConnected,
            ServerEvent::StudentScanned(_) => EventKind::StudentScanned,
            ServerEvent::StudentAdded(_) => EventKind::StudentAdded,
            ServerEvent::StudentUpdated(_) => EventKind::StudentUpdated,
            ServerEvent::StudentDeleted { .. } => EventKind::StudentDeleted,
            ServerEvent::StudentStatusChanged(_) => EventKind::StudentStatusChanged,
            ServerEvent::SchoolAdded(_) => EventKind::SchoolAdded,
            ServerEvent::SchoolUpdated(_) => EventKind::SchoolUpdated,
        }
    }

    /// Decode a pushed event packet.
    ///
    /// Returns `Ok(None)` for names outside the vocabulary and for reserved
    /// lifecycle names, which the server cannot push.
    pub fn from_wire(name: &str, payload: Value) -> Result<Option<Self>, EventError> {
        let kind = match EventKind::from_name(name) {
            Some(kind) if !kind.is_lifecycle() => kind,
            _ => return Ok(None),
        };

        let invalid = |source| EventError::InvalidPayload {
            event: kind.name(),
            source,
        };

        let event = match kind {
            EventKind::AdminConnected => {
                let info: AdminInfo = serde_json::from_value(payload).map_err(invalid)?;
                ServerEvent::AdminConnected {
                    username: info.username,
                }
            }
            EventKind::StudentScanned => ServerEvent::StudentScanned(payload),
            EventKind::StudentAdded => ServerEvent::StudentAdded(payload),
            EventKind::StudentUpdated => ServerEvent::StudentUpdated(payload),
            EventKind::StudentDeleted => {
                let student: StudentRef = serde_json::from_value(payload).map_err(invalid)?;
                ServerEvent::StudentDeleted {
                    student_id: student.student_id,
                }
            }
            EventKind::StudentStatusChanged => {
                ServerEvent::StudentStatusChanged(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::SchoolAdded => ServerEvent::SchoolAdded(payload),
            EventKind::SchoolUpdated => ServerEvent::SchoolUpdated(payload),
            EventKind::Connect | EventKind::Disconnect | EventKind::ConnectError => {
                return Ok(None)
            }
        };

        Ok(Some(event))
    }
}

/// Events the admin console emits after a successful REST write
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StudentScan(Value),
    StudentAdded(Value),
    StudentUpdated(Value),
    StudentDeleted(String),
    StudentStatusToggled(StudentStatus),
    SchoolAdded(Value),
    SchoolUpdated(Value),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::StudentScan(_) => "student:scan",
            ClientEvent::StudentAdded(_) => "admin:student-added",
            ClientEvent::StudentUpdated(_) => "admin:student-updated",
            ClientEvent::StudentDeleted(_) => "admin:student-deleted",
            ClientEvent::StudentStatusToggled(_) => "admin:student-status-toggled",
            ClientEvent::SchoolAdded(_) => "admin:school-added",
            ClientEvent::SchoolUpdated(_) => "admin:school-updated",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ClientEvent::StudentScan(v)
            | ClientEvent::StudentAdded(v)
            | ClientEvent::StudentUpdated(v)
            | ClientEvent::SchoolAdded(v)
            | ClientEvent::SchoolUpdated(v) => v.clone(),
            ClientEvent::StudentDeleted(id) => Value::String(id.clone()),
            ClientEvent::StudentStatusToggled(status) => json!({
                "studentId": status.student_id,
                "isActive": status.is_active,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_unique() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EventKind::from_name("student:exploded"), None);
    }

    #[test]
    fn test_decode_status_change() {
        let event = ServerEvent::from_wire(
            "student:status-changed",
            json!({ "studentId": "NS1-01", "isActive": false }),
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            event,
            ServerEvent::StudentStatusChanged(StudentStatus {
                student_id: "NS1-01".into(),
                is_active: false,
            })
        );
        assert_eq!(event.kind(), EventKind::StudentStatusChanged);
    }

    #[test]
    fn test_decode_deleted_requires_student_id() {
        let result = ServerEvent::from_wire("student:deleted", json!({ "id": 4 }));
        assert!(matches!(result, Err(EventError::InvalidPayload { .. })));
    }

    #[test]
    fn test_unknown_and_reserved_names_are_skipped() {
        assert!(ServerEvent::from_wire("chat:message", json!({})).unwrap().is_none());
        assert!(ServerEvent::from_wire("connect", json!({})).unwrap().is_none());
    }

    #[test]
    fn test_admin_connected_tolerates_missing_username() {
        let event = ServerEvent::from_wire("admin:connected", json!({})).unwrap();
        assert_eq!(
            event,
            Some(ServerEvent::AdminConnected {
                username: String::new()
            })
        );
    }

    #[test]
    fn test_client_event_payloads() {
        let deleted = ClientEvent::StudentDeleted("NS1-07".into());
        assert_eq!(deleted.name(), "admin:student-deleted");
        assert_eq!(deleted.payload(), json!("NS1-07"));

        let toggled = ClientEvent::StudentStatusToggled(StudentStatus {
            student_id: "NS1-07".into(),
            is_active: true,
        });
        assert_eq!(toggled.name(), "admin:student-status-toggled");
        assert_eq!(
            toggled.payload(),
            json!({ "studentId": "NS1-07", "isActive": true })
        );
    }
}
