//! Load-time validation for epic configuration.
//!
//! Every downstream component operates on a fully validated record set,
//! so the checks here run once, before any execution state exists.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{EpicConfig, TicketSpec};
use crate::types::TicketId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for TicketSpec {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.id.0.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "ticket.id.empty",
                message: "ticket id must not be empty".to_string(),
            });
        }

        if self.title.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "ticket.title.empty",
                message: format!("ticket '{}' has an empty title", self.id),
            });
        }

        if self.path.as_os_str().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "ticket.path.empty",
                message: format!("ticket '{}' has an empty instruction path", self.id),
            });
        }

        if self.depends_on.contains(&self.id) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "ticket.depends_on.self",
                message: format!("ticket '{}' depends on itself", self.id),
            });
        }

        issues
    }
}

impl Validate for EpicConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.epic_id.0.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "epic.epic_id.empty",
                message: "epic_id must not be empty".to_string(),
            });
        }

        if self.epic_branch.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "epic.epic_branch.empty",
                message: "epic_branch must not be empty".to_string(),
            });
        }

        if self.tickets.is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "epic.tickets.empty",
                message: "epic has no tickets; execution will finalize immediately".to_string(),
            });
        }

        if self.builder.command.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "builder.command.empty",
                message: "builder command must not be empty".to_string(),
            });
        }

        if self.builder.timeout_secs == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "builder.timeout.zero",
                message: "builder timeout must be greater than zero".to_string(),
            });
        }

        let mut seen = BTreeSet::new();
        for spec in &self.tickets {
            if !seen.insert(spec.id.clone()) {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "epic.tickets.duplicate_id",
                    message: format!("ticket id '{}' appears more than once", spec.id),
                });
            }
        }

        let known: BTreeSet<&TicketId> = self.tickets.iter().map(|spec| &spec.id).collect();
        for spec in &self.tickets {
            issues.extend(spec.validate());
            for dep in &spec.depends_on {
                if dep != &spec.id && !known.contains(dep) {
                    issues.push(ValidationIssue {
                        level: ValidationLevel::Error,
                        code: "ticket.depends_on.unknown",
                        message: format!("ticket '{}' depends on unknown ticket '{dep}'", spec.id),
                    });
                }
            }
        }

        issues
    }
}

/// Detect a dependency cycle among ticket specs.
///
/// Kahn's algorithm over the declared edges; unknown dependency ids are
/// ignored here (reported separately by `Validate`). Returns the sorted
/// ids of the tickets participating in a cycle, or `None` if acyclic.
pub fn detect_dependency_cycle(specs: &[TicketSpec]) -> Option<Vec<TicketId>> {
    let known: BTreeSet<&TicketId> = specs.iter().map(|spec| &spec.id).collect();

    let mut in_degree: BTreeMap<&TicketId, usize> = BTreeMap::new();
    let mut children: BTreeMap<&TicketId, Vec<&TicketId>> = BTreeMap::new();
    for spec in specs {
        in_degree.entry(&spec.id).or_insert(0);
        for dep in &spec.depends_on {
            if dep == &spec.id || !known.contains(dep) {
                continue;
            }
            *in_degree.entry(&spec.id).or_insert(0) += 1;
            children.entry(dep).or_default().push(&spec.id);
        }
    }

    let mut queue: Vec<&TicketId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut resolved = 0usize;

    while let Some(id) = queue.pop() {
        resolved += 1;
        for &child in children.get(id).into_iter().flatten() {
            let degree = in_degree
                .get_mut(child)
                .filter(|degree| **degree > 0)
                .map(|degree| {
                    *degree -= 1;
                    *degree
                });
            if degree == Some(0) {
                queue.push(child);
            }
        }
    }

    if resolved == specs.len() {
        return None;
    }

    let cycle: Vec<TicketId> = in_degree
        .into_iter()
        .filter(|(_, degree)| *degree > 0)
        .map(|(id, _)| id.clone())
        .collect();
    Some(cycle)
}
