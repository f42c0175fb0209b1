//! Trust-minimized escrow backend for freelance engagements
//!
//! A client deposits value (native currency or a fungible token) that is held
//! in custody until contractual conditions are met, then released to the
//! freelancer, refunded to the client, or split by arbitration. The crate
//! implements:
//! - The escrow lifecycle state machine (funding, work, completion, release,
//!   refund, dispute, emergency recovery)
//! - A per-escrow milestone sub-ledger with independent partial payouts
//! - Exact fee-split and validation arithmetic

pub mod clock;
pub mod error;
pub mod escrow_manager;
pub mod fees;
pub mod milestone_tracker;
pub mod models;
pub mod settings;
pub mod settlement;

use error::EscrowError;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
