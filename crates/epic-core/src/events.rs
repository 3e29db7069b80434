use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EpicId, EventId, TicketId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EpicStateChanged {
        from: String,
        to: String,
    },
    TicketStateChanged {
        from: String,
        to: String,
    },
    GateChecked {
        gate: String,
        passed: bool,
        reason: String,
    },
    BranchCreated {
        branch: String,
        base_commit: String,
    },
    BuilderStarted {
        branch: String,
    },
    BuilderFinished {
        success: bool,
        final_commit: Option<String>,
    },
    TicketBlocked {
        blocking_dependency: TicketId,
    },
    BranchMerged {
        branch: String,
        commit: String,
    },
    BranchDeleted {
        branch: String,
    },
    TicketReset {
        reason: String,
    },
    RollbackStarted,
    RollbackCompleted,
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub ticket_id: Option<TicketId>,
    pub epic_id: Option<EpicId>,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

#[cfg(test)]
mod tests {
    use super::{Event, EventKind};
    use crate::types::{EpicId, EventId, TicketId};
    use chrono::{TimeZone, Utc};

    #[test]
    fn event_kind_serializes_with_snake_case_variant_names() {
        let kind = EventKind::TicketStateChanged {
            from: "READY".to_string(),
            to: "BRANCH_CREATED".to_string(),
        };

        let encoded = serde_json::to_string(&kind).expect("serialize event kind");
        assert!(encoded.contains("ticket_state_changed"));

        let decoded: EventKind = serde_json::from_str(&encoded).expect("deserialize event kind");
        assert_eq!(decoded, kind);
    }

    #[test]
    fn unit_variants_roundtrip() {
        for kind in [EventKind::RollbackStarted, EventKind::RollbackCompleted] {
            let encoded = serde_json::to_string(&kind).expect("serialize");
            let decoded: EventKind = serde_json::from_str(&encoded).expect("deserialize");
            assert_eq!(decoded, kind);
        }
    }

    #[test]
    fn event_roundtrip_preserves_identifiers_timestamp_and_payload() {
        let event = Event {
            id: EventId("E100".to_string()),
            ticket_id: Some(TicketId::new("T200")),
            epic_id: Some(EpicId("epic-auth".to_string())),
            at: Utc
                .with_ymd_and_hms(2026, 8, 6, 12, 30, 45)
                .single()
                .expect("valid timestamp"),
            kind: EventKind::GateChecked {
                gate: "validation".to_string(),
                passed: false,
                reason: "branch ticket/T200 has no commits beyond base".to_string(),
            },
        };

        let encoded = serde_json::to_string(&event).expect("serialize event");
        let decoded: Event = serde_json::from_str(&encoded).expect("deserialize event");
        assert_eq!(decoded, event);
    }

    #[test]
    fn builder_finished_preserves_optional_commit() {
        let kind = EventKind::BuilderFinished {
            success: true,
            final_commit: Some("abc123".to_string()),
        };
        let encoded = serde_json::to_string(&kind).expect("serialize");
        let decoded: EventKind = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, kind);

        let kind = EventKind::BuilderFinished {
            success: false,
            final_commit: None,
        };
        let encoded = serde_json::to_string(&kind).expect("serialize");
        let decoded: EventKind = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, kind);
    }
}
