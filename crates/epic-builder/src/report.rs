//! Parsing of the worker's structured result block.
//!
//! The worker is required to print exactly one block:
//!
//! ```text
//! RAIDO_RESULT_BEGIN
//! { "success": true, "final_commit": "…", "test_status": "passing", … }
//! RAIDO_RESULT_END
//! ```
//!
//! A missing or malformed block is an ordinary failure result, never an
//! error: the worker is untrusted, so its output cannot crash the
//! controller.

use epic_core::state::TestSuiteStatus;
use epic_core::types::{AcceptanceCriterion, BuilderResult};
use serde::{Deserialize, Serialize};

pub const RESULT_BEGIN_MARKER: &str = "RAIDO_RESULT_BEGIN";
pub const RESULT_END_MARKER: &str = "RAIDO_RESULT_END";

/// Wire format of the result block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderReport {
    pub success: bool,
    #[serde(default)]
    pub final_commit: Option<String>,
    #[serde(default)]
    pub test_status: Option<TestSuiteStatus>,
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Interpret raw worker output, always producing a result.
pub fn parse_builder_output(raw: &str) -> BuilderResult {
    let block = match extract_result_block(raw) {
        Ok(block) => block,
        Err(reason) => return BuilderResult::failure(reason, raw),
    };

    match serde_json::from_str::<BuilderReport>(&block) {
        Ok(report) => BuilderResult {
            success: report.success,
            final_commit: report.final_commit,
            test_status: report.test_status,
            acceptance_criteria: report.acceptance_criteria,
            error: report.error,
            raw_output: raw.to_string(),
        },
        Err(err) => BuilderResult::failure(format!("malformed worker result block: {err}"), raw),
    }
}

/// Extract the contents of the last complete result block. The last
/// one wins because workers tend to echo their instructions, which may
/// themselves contain an example block.
fn extract_result_block(raw: &str) -> Result<String, String> {
    let mut block: Option<String> = None;
    let mut current: Option<Vec<&str>> = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed == RESULT_BEGIN_MARKER {
            current = Some(Vec::new());
        } else if trimmed == RESULT_END_MARKER {
            if let Some(lines) = current.take() {
                block = Some(lines.join("\n"));
            }
        } else if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }

    if current.is_some() {
        return Err(format!(
            "worker result block was opened but never closed with {RESULT_END_MARKER}"
        ));
    }
    block.ok_or_else(|| format!("worker output contained no {RESULT_BEGIN_MARKER} block"))
}
