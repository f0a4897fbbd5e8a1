//! Durable repository implementations

pub mod idempotency;
pub mod receipts;
pub mod replay;
pub mod runs;
pub mod tokens;

pub use idempotency::*;
pub use receipts::*;
pub use replay::*;
pub use runs::*;
pub use tokens::*;
