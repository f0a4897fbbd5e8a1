//! Anumate Types - Canonical domain types for the automation control plane
//!
//! This crate contains all foundational types for Anumate with zero
//! dependencies on other anumate crates. It defines the type system for:
//!
//! - Identity types (TenantId, RunId, ApprovalId, etc.)
//! - Capsule definitions (declarative automation artifacts)
//! - Executable plans (compiled, content-addressed DAGs)
//! - Execution runs and their state machine
//! - Approvals, capability token claims, and receipts
//! - The CloudEvents envelope used on the event bus
//!
//! # Architectural Invariants
//!
//! 1. Every entity carries a `tenant_id` and is tenant-scoped everywhere
//! 2. A plan hash is the contract between preview and execution
//! 3. Runs never leave a terminal state
//! 4. Receipts are immutable and chained per tenant

pub mod identity;
pub mod capsule;
pub mod plan;
pub mod run;
pub mod approval;
pub mod token;
pub mod receipt;
pub mod event;
pub mod error;

pub use identity::*;
pub use capsule::*;
pub use plan::*;
pub use run::*;
pub use approval::*;
pub use token::*;
pub use receipt::*;
pub use event::*;
pub use error::*;

/// Version of the Anumate types schema
pub const TYPES_VERSION: &str = "0.1.0";
