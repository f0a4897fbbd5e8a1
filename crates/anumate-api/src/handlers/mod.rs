//! Request handlers for the /v1 surface

pub mod approvals;
pub mod capsules;
pub mod captokens;
pub mod compile;
pub mod executions;
pub mod ghostrun;
pub mod health;
pub mod receipts;
