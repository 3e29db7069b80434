pub mod config;
pub mod events;
pub mod state;
pub mod types;
pub mod validation;

pub use config::*;
pub use events::*;
pub use state::*;
pub use types::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::{parse_epic_config, EpicState, TicketId, TicketState, Validate};
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_core_types() {
        let _ = TypeId::of::<TicketId>();
        let _ = TypeId::of::<TicketState>();
        let _ = TypeId::of::<EpicState>();
    }

    #[test]
    fn crate_root_reexports_parse_and_validate_helpers() {
        let config = parse_epic_config(
            r#"
epic_id = "epic-demo"
epic_branch = "epic/demo"

[[ticket]]
id = "T1"
path = "tickets/T1.md"
title = "First"
"#,
        )
        .expect("parse epic");

        assert!(config.validate().is_empty());
    }
}
