pub mod action;
pub mod config;
pub mod eligibility;
pub mod inventory;
pub mod slug;
pub mod types;
pub mod validation;

pub use action::*;
pub use config::*;
pub use eligibility::*;
pub use inventory::*;
pub use slug::*;
pub use types::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::{
        feature_slug, parse_config, ActionKind, Inventory, Repository, SyncState, Target, Validate,
    };
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_core_types() {
        let _ = TypeId::of::<Repository>();
        let _ = TypeId::of::<Inventory>();
        let _ = TypeId::of::<SyncState>();
        let _ = TypeId::of::<Target>();
    }

    #[test]
    fn crate_root_reexports_parse_and_validate_helpers() {
        let mut config = parse_config(
            r#"
[concurrency]
classify = 4
bulk = 2

[feature]
number_width = 4
"#,
        )
        .expect("parse config");
        assert!(config.validate().is_empty());

        config.concurrency.classify = 0;
        assert!(config
            .validate()
            .iter()
            .any(|issue| issue.code == "concurrency.classify.zero"));

        assert_eq!("pull".parse::<ActionKind>().ok(), Some(ActionKind::Pull));
        assert_eq!(
            feature_slug("Add search to settings", &[]).as_deref(),
            Some("search-settings")
        );
    }
}
