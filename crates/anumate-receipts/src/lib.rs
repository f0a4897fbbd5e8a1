//! Anumate Receipts - Tamper-evident execution records
//!
//! Receipts are the trust artifacts of the control plane: immutable, signed,
//! chained per tenant, and optionally exported to write-once storage.
//!
//! Creation: canonicalize the payload, hash it, sign the hash, link the
//! tenant's chain head under compare-and-set, persist, export. Verification
//! recomputes the hash, checks the signature against the known public key
//! and optionally compares the WORM copy byte for byte.

pub mod service;
pub mod store;
pub mod worm;

pub use service::*;
pub use store::*;
pub use worm::*;

use anumate_types::{ErrorKind, IntoErrorKind};
use thiserror::Error;

/// Receipt errors
#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("Receipt {receipt_id} not found")]
    NotFound { receipt_id: String },

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Chain head moved during append; retry exhausted")]
    ChainContention,

    #[error("WORM export failed: {0}")]
    Worm(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal receipt error: {0}")]
    Internal(String),
}

pub type ReceiptResult<T> = Result<T, ReceiptError>;

impl IntoErrorKind for ReceiptError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ChainContention => ErrorKind::Conflict,
            Self::Worm(_) | Self::Store(_) => ErrorKind::Transient,
            Self::SigningFailed(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
