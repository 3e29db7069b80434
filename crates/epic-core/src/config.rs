//! Epic configuration: the input document listing tickets and policy.
//!
//! Read-only after load. Loading validates eagerly (including the
//! acyclic-dependency check) so every downstream component operates on
//! a fully validated record set.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{EpicId, Ticket, TicketId};
use crate::validation::{detect_dependency_cycle, Validate, ValidationIssue, ValidationLevel};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read epic config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse epic config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("epic config at {path} failed validation with {} error(s)", .issues.len())]
    Invalid {
        path: PathBuf,
        issues: Vec<ValidationIssue>,
    },
    #[error("dependency cycle among tickets: {cycle:?}")]
    DependencyCycle { cycle: Vec<TicketId> },
}

/// Epic-level configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpicConfig {
    pub epic_id: EpicId,
    pub epic_branch: String,
    /// Roll back (delete ticket branches, reset the epic branch) on a
    /// critical ticket failure instead of just failing the epic.
    #[serde(default)]
    pub rollback_on_failure: bool,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default, rename = "ticket")]
    pub tickets: Vec<TicketSpec>,
}

/// How to invoke the worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderConfig {
    #[serde(default = "default_builder_command")]
    pub command: String,
    #[serde(default = "default_builder_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_builder_command() -> String {
    "raido-worker".to_string()
}

fn default_builder_timeout_secs() -> u64 {
    3600
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            command: default_builder_command(),
            timeout_secs: default_builder_timeout_secs(),
        }
    }
}

/// One ticket entry in the epic config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSpec {
    pub id: TicketId,
    pub path: PathBuf,
    pub title: String,
    #[serde(default)]
    pub depends_on: Vec<TicketId>,
    #[serde(default)]
    pub critical: bool,
}

/// Parse an epic config document without validating it.
pub fn parse_epic_config(content: &str) -> Result<EpicConfig, toml::de::Error> {
    toml::from_str(content)
}

/// Load, parse, and validate an epic config file.
///
/// Validation errors and dependency cycles are fatal; warnings are
/// returned alongside the config for the caller to surface.
pub fn load_epic_config(
    path: &Path,
) -> Result<(EpicConfig, Vec<ValidationIssue>), ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_epic_config(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let (errors, warnings): (Vec<_>, Vec<_>) = config
        .validate()
        .into_iter()
        .partition(|issue| issue.level == ValidationLevel::Error);
    if !errors.is_empty() {
        return Err(ConfigError::Invalid {
            path: path.to_path_buf(),
            issues: errors,
        });
    }

    if let Some(cycle) = detect_dependency_cycle(&config.tickets) {
        return Err(ConfigError::DependencyCycle { cycle });
    }

    Ok((config, warnings))
}

/// Build the initial ticket record for a spec entry.
pub fn ticket_from_spec(spec: &TicketSpec) -> Ticket {
    let mut ticket = Ticket::new(spec.id.clone(), spec.path.clone(), spec.title.clone());
    ticket.depends_on = spec.depends_on.clone();
    ticket.critical = spec.critical;
    ticket
}

#[cfg(test)]
mod tests {
    use super::{load_epic_config, parse_epic_config, ticket_from_spec, ConfigError};
    use crate::state::TicketState;
    use crate::types::TicketId;
    use std::time::{SystemTime, UNIX_EPOCH};

    const EXAMPLE: &str = r#"
epic_id = "epic-auth"
epic_branch = "epic/auth"
rollback_on_failure = true

[builder]
command = "claude-worker"
timeout_secs = 1800

[[ticket]]
id = "T1"
path = "tickets/T1.md"
title = "Add session model"
critical = true

[[ticket]]
id = "T2"
path = "tickets/T2.md"
title = "Add login endpoint"
depends_on = ["T1"]
"#;

    fn write_temp_config(name: &str, content: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("raido-config-{name}-{nanos}.toml"));
        std::fs::write(&path, content).expect("write config");
        path
    }

    #[test]
    fn parses_full_document() {
        let config = parse_epic_config(EXAMPLE).expect("parse epic config");
        assert_eq!(config.epic_id.0, "epic-auth");
        assert_eq!(config.epic_branch, "epic/auth");
        assert!(config.rollback_on_failure);
        assert_eq!(config.builder.command, "claude-worker");
        assert_eq!(config.builder.timeout_secs, 1800);
        assert_eq!(config.tickets.len(), 2);
        assert!(config.tickets[0].critical);
        assert_eq!(config.tickets[1].depends_on, vec![TicketId::new("T1")]);
    }

    #[test]
    fn builder_section_defaults_when_missing() {
        let config = parse_epic_config(
            r#"
epic_id = "e"
epic_branch = "epic/e"
"#,
        )
        .expect("parse minimal config");
        assert_eq!(config.builder.command, "raido-worker");
        assert_eq!(config.builder.timeout_secs, 3600);
        assert!(!config.rollback_on_failure);
        assert!(config.tickets.is_empty());
    }

    #[test]
    fn load_rejects_validation_errors() {
        let path = write_temp_config(
            "invalid",
            r#"
epic_id = ""
epic_branch = "epic/e"

[[ticket]]
id = "T1"
path = "tickets/T1.md"
title = "Ticket"
"#,
        );
        let err = load_epic_config(&path).expect_err("empty epic_id should fail");
        match err {
            ConfigError::Invalid { issues, .. } => {
                assert!(issues.iter().any(|i| i.code == "epic.epic_id.empty"));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn load_rejects_dependency_cycle() {
        let path = write_temp_config(
            "cycle",
            r#"
epic_id = "e"
epic_branch = "epic/e"

[[ticket]]
id = "T1"
path = "tickets/T1.md"
title = "A"
depends_on = ["T2"]

[[ticket]]
id = "T2"
path = "tickets/T2.md"
title = "B"
depends_on = ["T1"]
"#,
        );
        let err = load_epic_config(&path).expect_err("cycle should fail");
        match err {
            ConfigError::DependencyCycle { cycle } => {
                assert_eq!(cycle, vec![TicketId::new("T1"), TicketId::new("T2")]);
            }
            other => panic!("expected DependencyCycle, got {other:?}"),
        }
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn load_accepts_valid_config_and_returns_warnings() {
        let path = write_temp_config(
            "empty-tickets",
            r#"
epic_id = "e"
epic_branch = "epic/e"
"#,
        );
        let (config, warnings) = load_epic_config(&path).expect("load");
        assert_eq!(config.epic_id.0, "e");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, "epic.tickets.empty");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn ticket_from_spec_maps_fields() {
        let config = parse_epic_config(EXAMPLE).expect("parse epic config");
        let ticket = ticket_from_spec(&config.tickets[1]);
        assert_eq!(ticket.id, TicketId::new("T2"));
        assert_eq!(ticket.title, "Add login endpoint");
        assert_eq!(ticket.state, TicketState::Pending);
        assert_eq!(ticket.depends_on, vec![TicketId::new("T1")]);
        assert!(!ticket.critical);
        assert!(ticket.git_info.is_none());
    }

    #[test]
    fn missing_file_reports_read_error() {
        let err = load_epic_config(std::path::Path::new("/definitely/missing/epic.toml"))
            .expect_err("missing file");
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
