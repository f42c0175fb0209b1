//! Core data models for the escrow system
//!
//! This module contains the escrow record, milestone and dispute models,
//! the status state machine, and the audit-trail event type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EscrowResult;
use crate::error::EscrowError;

/// Escrow state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// Escrow record created but not yet funded (never observable in
    /// practice: creation and funding are atomic)
    Created,
    /// Deposit held in custody
    Funded,
    /// Freelancer has started work
    WorkInProgress,
    /// Freelancer has marked work complete, awaiting client approval
    WorkCompleted,
    /// Under arbitration
    Disputed,
    /// Funds released to freelancer (and platform)
    Released,
    /// Funds returned to client
    Refunded,
    /// Administratively cancelled, balance swept
    Cancelled,
}

impl EscrowStatus {
    /// Check if this is a terminal state (permanent tombstone)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded | Self::Cancelled)
    }

    /// Check if the freelancer may start work
    pub fn can_start_work(&self) -> bool {
        matches!(self, Self::Funded)
    }

    /// Check if the freelancer may mark work complete
    pub fn can_complete_work(&self) -> bool {
        matches!(self, Self::Funded | Self::WorkInProgress)
    }

    /// Check if the client may approve and release
    pub fn can_approve_work(&self) -> bool {
        matches!(self, Self::WorkCompleted)
    }

    /// Check if the client may request a deadline refund
    pub fn can_refund(&self) -> bool {
        matches!(self, Self::Funded | Self::WorkInProgress)
    }

    /// Check if either party may raise a dispute
    pub fn can_dispute(&self) -> bool {
        matches!(self, Self::WorkInProgress | Self::WorkCompleted)
    }

    /// Check if the arbitrator may resolve a dispute
    pub fn can_resolve(&self) -> bool {
        matches!(self, Self::Disputed)
    }
}

/// Settlement rail, fixed at escrow creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementKind {
    /// Native currency settlement
    Native,
    /// Fungible-token settlement
    Token,
}

/// Escrow record for one client-freelancer agreement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escrow {
    /// Caller-supplied identifier, unique per active agreement
    pub id: Uuid,

    // Parties
    pub client: String,
    pub freelancer: String,

    // Amounts (smallest currency unit)
    pub amount: u64,
    pub platform_fee: u64,
    pub freelancer_amount: u64,
    /// Running total of value already settled out of custody
    pub paid_out: u64,

    pub status: EscrowStatus,
    pub settlement: SettlementKind,
    /// Token handle for token escrows
    pub token: Option<String>,

    // Progress flags
    pub client_approved: bool,
    pub freelancer_completed: bool,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// State transition record used for validation
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from_status: EscrowStatus,
    pub to_status: EscrowStatus,
    pub valid: bool,
}

impl Escrow {
    /// Create a new funded escrow
    pub fn new(
        id: Uuid,
        client: String,
        freelancer: String,
        amount: u64,
        platform_fee: u64,
        freelancer_amount: u64,
        settlement: SettlementKind,
        token: Option<String>,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            client,
            freelancer,
            amount,
            platform_fee,
            freelancer_amount,
            paid_out: 0,
            status: EscrowStatus::Funded,
            settlement,
            token,
            client_approved: false,
            freelancer_completed: false,
            created_at: now,
            deadline,
            updated_at: now,
        }
    }

    /// Custodied balance not yet settled out
    pub fn remaining(&self) -> u64 {
        self.amount.saturating_sub(self.paid_out)
    }

    /// Validate a state transition against the lifecycle matrix
    pub fn validate_transition(&self, to_status: EscrowStatus) -> EscrowResult<StateTransition> {
        use EscrowStatus::*;

        let valid = match (self.status, to_status) {
            (Created, Funded) => true,
            (Funded, WorkInProgress) => true,
            (Funded, WorkCompleted) => true,
            (Funded, Refunded) => true,
            (WorkInProgress, WorkCompleted) => true,
            (WorkInProgress, Refunded) => true,
            (WorkInProgress, Disputed) => true,
            (WorkCompleted, Released) => true,
            (WorkCompleted, Disputed) => true,
            (Disputed, Released) => true,
            (Disputed, Refunded) => true,
            // Emergency recovery can override any status
            (_, Cancelled) => true,
            _ => false,
        };

        if valid {
            Ok(StateTransition {
                from_status: self.status,
                to_status,
                valid: true,
            })
        } else {
            Err(EscrowError::state_transition(
                format!("{:?}", self.status),
                format!("{:?}", to_status),
                "Invalid state transition".to_string(),
            ))
        }
    }
}

/// Milestone model: a sub-deliverable with its own partial amount
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub description: String,
    pub amount: u64,
    pub due_date: DateTime<Utc>,
    pub completed: bool,
    pub approved: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl Milestone {
    /// Create a new pending milestone
    pub fn new(description: String, amount: u64, due_date: DateTime<Utc>) -> Self {
        Self {
            description,
            amount,
            due_date,
            completed: false,
            approved: false,
            completed_at: None,
            approved_at: None,
        }
    }
}

/// Dispute model for arbitration (at most one per escrow)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub escrow_id: Uuid,
    pub raised_by: String,
    pub reason: String,
    pub raised_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    /// Create a new unresolved dispute
    pub fn new(escrow_id: Uuid, raised_by: String, reason: String, now: DateTime<Utc>) -> Self {
        Self {
            escrow_id,
            raised_by,
            reason,
            raised_at: now,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        }
    }
}

/// Escrow event for the append-only audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowEvent {
    pub event_type: String,
    pub escrow_id: Uuid,
    pub actor: Option<String>,
    pub amount: Option<u64>,
    pub metadata: Option<serde_json::Value>,

    // Timestamp (immutable)
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_escrow(status: EscrowStatus) -> Escrow {
        let now = Utc::now();
        let mut escrow = Escrow::new(
            Uuid::new_v4(),
            "client".to_string(),
            "freelancer".to_string(),
            1000,
            200,
            800,
            SettlementKind::Native,
            None,
            now + chrono::Duration::days(7),
            now,
        );
        escrow.status = status;
        escrow
    }

    #[test]
    fn terminal_states() {
        assert!(EscrowStatus::Released.is_terminal());
        assert!(EscrowStatus::Refunded.is_terminal());
        assert!(EscrowStatus::Cancelled.is_terminal());
        assert!(!EscrowStatus::Funded.is_terminal());
        assert!(!EscrowStatus::Disputed.is_terminal());
    }

    #[test]
    fn valid_lifecycle_transitions() {
        assert!(
            sample_escrow(EscrowStatus::Funded)
                .validate_transition(EscrowStatus::WorkCompleted)
                .is_ok()
        );
        assert!(
            sample_escrow(EscrowStatus::WorkInProgress)
                .validate_transition(EscrowStatus::Disputed)
                .is_ok()
        );
        assert!(
            sample_escrow(EscrowStatus::Disputed)
                .validate_transition(EscrowStatus::Refunded)
                .is_ok()
        );
    }

    #[test]
    fn invalid_transitions_rejected() {
        let err = sample_escrow(EscrowStatus::Released)
            .validate_transition(EscrowStatus::WorkCompleted)
            .unwrap_err();
        assert!(matches!(err, EscrowError::StateTransition { .. }));

        assert!(
            sample_escrow(EscrowStatus::Funded)
                .validate_transition(EscrowStatus::Disputed)
                .is_err()
        );
        assert!(
            sample_escrow(EscrowStatus::WorkCompleted)
                .validate_transition(EscrowStatus::Refunded)
                .is_err()
        );
    }

    #[test]
    fn cancellation_overrides_any_status() {
        for status in [
            EscrowStatus::Funded,
            EscrowStatus::WorkCompleted,
            EscrowStatus::Disputed,
            EscrowStatus::Released,
        ] {
            assert!(
                sample_escrow(status)
                    .validate_transition(EscrowStatus::Cancelled)
                    .is_ok()
            );
        }
    }

    #[test]
    fn remaining_tracks_paid_out() {
        let mut escrow = sample_escrow(EscrowStatus::Funded);
        assert_eq!(escrow.remaining(), 1000);
        escrow.paid_out = 400;
        assert_eq!(escrow.remaining(), 600);
    }
}
