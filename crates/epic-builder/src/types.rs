use epic_core::types::{BuilderResult, TicketId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::BuilderError;

/// Everything the worker needs to build one ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub ticket_id: TicketId,
    /// Path to the ticket's instruction file.
    pub ticket_path: PathBuf,
    /// Branch the worker must commit to.
    pub branch: String,
    /// Commit the branch starts from.
    pub base_commit: String,
    /// Path to the epic definition.
    pub epic_path: PathBuf,
    /// Repository the worker runs in.
    pub repo_path: PathBuf,
    pub timeout_secs: u64,
}

/// Blocking, bounded invocation of the external worker for one ticket.
///
/// Implementations never surface worker failures or timeouts as
/// errors: those come back as a `BuilderResult` with `success = false`
/// so the orchestrator's failure handling stays uniform. Errors are
/// reserved for invocation-environment problems (bad request, pty or
/// spawn failure).
pub trait TicketBuilder {
    fn execute(&self, request: &BuildRequest) -> Result<BuilderResult, BuilderError>;
}

#[cfg(test)]
mod tests {
    use super::BuildRequest;
    use epic_core::types::TicketId;
    use std::path::PathBuf;

    #[test]
    fn build_request_round_trips_through_json() {
        let request = BuildRequest {
            ticket_id: TicketId::new("T1"),
            ticket_path: PathBuf::from("tickets/T1.md"),
            branch: "ticket/T1".to_string(),
            base_commit: "abc123".to_string(),
            epic_path: PathBuf::from("epic.toml"),
            repo_path: PathBuf::from("/tmp/repo"),
            timeout_secs: 3600,
        };

        let json = serde_json::to_string(&request).unwrap();
        let decoded: BuildRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, request);
    }
}
