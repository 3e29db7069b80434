//! Raido orchestrator crate: gates, transition tables, persistence,
//! recovery, and the epic state machine.

pub mod event_log;
pub mod executor;
pub mod gates;
pub mod persistence;
pub mod recovery;
pub mod scheduler;
pub mod state_machine;

#[cfg(test)]
pub(crate) mod test_support;

pub use event_log::*;
pub use executor::*;
pub use gates::*;
pub use persistence::*;
pub use recovery::*;
pub use scheduler::*;
pub use state_machine::*;
