//! Concrete [`AlertClient`](crate::AlertClient) implementations.
//!
//! Contains [`OpsGenieClient`] for delivery through the OpsGenie REST API
//! and [`LogAlertClient`] which only logs alerts (dry run).

pub mod dry_run;
pub mod opsgenie;

pub use dry_run::*;
pub use opsgenie::*;
