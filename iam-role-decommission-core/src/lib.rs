//! Safe decommissioning of unused IAM roles across many accounts.
//!
//! The pipeline per role is: chained credential delegation
//! ([`broker`]) -> complete role snapshot ([`inspector`]) -> age/usage
//! verdict ([`eligibility`]) -> verified local + remote backup ([`store`]) ->
//! ordered teardown ([`decommission`]). [`orchestrator`] drives it over a
//! batch of accounts and isolates failures per role and per account.
//!
//! Nothing is deleted unless a complete snapshot exists and both backup
//! copies were verified.

pub mod assignments;
pub mod aws;
pub mod broker;
pub mod config;
pub mod decommission;
pub mod eligibility;
pub mod error;
pub mod inspector;
pub mod orchestrator;
pub mod snapshot;
pub mod store;

#[cfg(test)]
mod test_support;

pub use assignments::{load_assignments, parse_assignments, single_assignment, AccountAssignment};
pub use config::{DecommissionConfig, RetryPolicy, RunMode, DEFAULT_REGION, DEFAULT_THRESHOLD_DAYS};
pub use error::{DecommissionError, FatalError};
pub use orchestrator::{AccountOrchestrator, InspectionReport, RunReport, RunSummary};
