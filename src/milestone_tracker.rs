//! Milestone Tracker - Per-escrow sub-ledger of deliverables
//!
//! Owns the ordered milestone sequences keyed by escrow id and pays out
//! approved milestones directly through the settlement primitive. The tracker
//! holds no reference to the escrow record: the escrow manager hands it every
//! payout parameter per call, and the manager is responsible for array-shape
//! validation and caller authorization before delegating.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::EscrowResult;
use crate::clock::Clock;
use crate::error::EscrowError;
use crate::fees;
use crate::models::{Milestone, SettlementKind};
use crate::settlement::Settlement;

/// Payout parameters handed in by the escrow manager on each approval
#[derive(Debug, Clone)]
pub struct MilestonePayout {
    pub freelancer: String,
    pub platform_wallet: String,
    pub fee_percent: u8,
    pub token: Option<String>,
    pub kind: SettlementKind,
}

/// Tracks milestone sequences and settles per-milestone payouts
pub struct MilestoneTracker {
    milestones: RwLock<HashMap<Uuid, Vec<Milestone>>>,
    settlement: Arc<dyn Settlement>,
    clock: Arc<dyn Clock>,
}

impl MilestoneTracker {
    /// Create a new tracker
    pub fn new(settlement: Arc<dyn Settlement>, clock: Arc<dyn Clock>) -> Self {
        Self {
            milestones: RwLock::new(HashMap::new()),
            settlement,
            clock,
        }
    }

    /// Append milestones for an escrow
    ///
    /// Shape validation (equal lengths, amounts summing to the escrow total)
    /// is the caller's responsibility before invocation.
    pub async fn add_milestones(
        &self,
        escrow_id: Uuid,
        descriptions: Vec<String>,
        amounts: Vec<u64>,
        due_dates: Vec<DateTime<Utc>>,
    ) {
        let entries: Vec<Milestone> = descriptions
            .into_iter()
            .zip(amounts)
            .zip(due_dates)
            .map(|((description, amount), due_date)| Milestone::new(description, amount, due_date))
            .collect();

        info!("Adding {} milestones for escrow {}", entries.len(), escrow_id);

        self.milestones
            .write()
            .await
            .entry(escrow_id)
            .or_default()
            .extend(entries);
    }

    /// Mark a milestone complete, before its own due date
    pub async fn complete_milestone(&self, escrow_id: Uuid, index: usize) -> EscrowResult<Milestone> {
        let now = self.clock.now();
        let mut milestones = self.milestones.write().await;
        let milestone = milestones
            .get_mut(&escrow_id)
            .and_then(|seq| seq.get_mut(index))
            .ok_or(EscrowError::MilestoneNotFound { escrow_id, index })?;

        if milestone.completed {
            return Err(EscrowError::state_transition(
                "Completed".to_string(),
                "Completed".to_string(),
                format!("Milestone {index} is already completed"),
            ));
        }
        if now > milestone.due_date {
            return Err(EscrowError::deadline(format!(
                "Milestone {index} due date has passed"
            )));
        }

        milestone.completed = true;
        milestone.completed_at = Some(now);

        info!("Completed milestone {} of escrow {}", index, escrow_id);

        Ok(milestone.clone())
    }

    /// Approve a completed milestone and pay out its portion
    ///
    /// The fee split is computed on this milestone's amount alone. Returns the
    /// milestone amount settled out of custody.
    pub async fn approve_milestone(
        &self,
        escrow_id: Uuid,
        index: usize,
        payout: MilestonePayout,
    ) -> EscrowResult<u64> {
        let now = self.clock.now();
        let amount = {
            let mut milestones = self.milestones.write().await;
            let milestone = milestones
                .get_mut(&escrow_id)
                .and_then(|seq| seq.get_mut(index))
                .ok_or(EscrowError::MilestoneNotFound { escrow_id, index })?;

            if !milestone.completed {
                return Err(EscrowError::state_transition(
                    "Pending".to_string(),
                    "Approved".to_string(),
                    format!("Milestone {index} is not completed"),
                ));
            }
            if milestone.approved {
                return Err(EscrowError::state_transition(
                    "Approved".to_string(),
                    "Approved".to_string(),
                    format!("Milestone {index} is already approved"),
                ));
            }

            // Approval committed before any external settlement call; a
            // reentrant approval sees the flag and is rejected above.
            milestone.approved = true;
            milestone.approved_at = Some(now);
            milestone.amount
        };

        let split = fees::calculate_fee(amount, payout.fee_percent)?;
        if let Err(err) = self.settle(&payout, split.remainder, split.fee).await {
            // Failed settlement aborts the approval with no state change
            let mut milestones = self.milestones.write().await;
            if let Some(milestone) = milestones.get_mut(&escrow_id).and_then(|s| s.get_mut(index)) {
                milestone.approved = false;
                milestone.approved_at = None;
            }
            return Err(err);
        }

        info!(
            "Approved milestone {} of escrow {}: {} to freelancer, {} platform fee",
            index, escrow_id, split.remainder, split.fee
        );

        Ok(amount)
    }

    async fn settle(
        &self,
        payout: &MilestonePayout,
        freelancer_amount: u64,
        platform_fee: u64,
    ) -> EscrowResult<()> {
        match payout.kind {
            SettlementKind::Native => {
                if freelancer_amount > 0 {
                    self.settlement
                        .transfer_native(&payout.freelancer, freelancer_amount)
                        .await?;
                }
                if platform_fee > 0 {
                    self.settlement
                        .transfer_native(&payout.platform_wallet, platform_fee)
                        .await?;
                }
            }
            SettlementKind::Token => {
                let token = payout
                    .token
                    .as_deref()
                    .ok_or_else(|| EscrowError::validation("Token escrow has no token handle"))?;
                if freelancer_amount > 0 {
                    self.settlement
                        .transfer_token(token, &payout.freelancer, freelancer_amount)
                        .await?;
                }
                if platform_fee > 0 {
                    self.settlement
                        .transfer_token(token, &payout.platform_wallet, platform_fee)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Full milestone sequence for an escrow
    pub async fn milestones(&self, escrow_id: Uuid) -> Vec<Milestone> {
        self.milestones
            .read()
            .await
            .get(&escrow_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of milestones for an escrow
    pub async fn milestone_count(&self, escrow_id: Uuid) -> usize {
        self.milestones
            .read()
            .await
            .get(&escrow_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// One milestone by index; out of range is an error, not a default
    pub async fn milestone(&self, escrow_id: Uuid, index: usize) -> EscrowResult<Milestone> {
        self.milestones
            .read()
            .await
            .get(&escrow_id)
            .and_then(|seq| seq.get(index))
            .cloned()
            .ok_or(EscrowError::MilestoneNotFound { escrow_id, index })
    }

    /// Whether the escrow has any milestones
    pub async fn has_milestones(&self, escrow_id: Uuid) -> bool {
        self.milestone_count(escrow_id).await > 0
    }

    /// Whether the escrow has milestones and every one is approved
    pub async fn all_approved(&self, escrow_id: Uuid) -> bool {
        self.milestones
            .read()
            .await
            .get(&escrow_id)
            .map(|seq| !seq.is_empty() && seq.iter().all(|m| m.approved))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::settlement::MemoryLedger;

    fn payout() -> MilestonePayout {
        MilestonePayout {
            freelancer: "freelancer".to_string(),
            platform_wallet: "platform".to_string(),
            fee_percent: 20,
            token: None,
            kind: SettlementKind::Native,
        }
    }

    async fn tracker_with_milestones(
        amounts: &[u64],
        funded: u64,
    ) -> (MilestoneTracker, Arc<MemoryLedger>, ManualClock, Uuid) {
        let clock = ManualClock::new(Utc::now());
        let ledger = MemoryLedger::new("custody");
        ledger.credit_native("custody", funded).await;

        let tracker = MilestoneTracker::new(ledger.clone(), Arc::new(clock.clone()));
        let escrow_id = Uuid::new_v4();
        let due = clock.now() + chrono::Duration::days(7);
        tracker
            .add_milestones(
                escrow_id,
                amounts.iter().map(|a| format!("deliverable {a}")).collect(),
                amounts.to_vec(),
                vec![due; amounts.len()],
            )
            .await;

        (tracker, ledger, clock, escrow_id)
    }

    #[tokio::test]
    async fn complete_then_approve_pays_split() {
        let (tracker, ledger, _clock, id) = tracker_with_milestones(&[400, 600], 1000).await;

        tracker.complete_milestone(id, 0).await.unwrap();
        let paid = tracker.approve_milestone(id, 0, payout()).await.unwrap();

        assert_eq!(paid, 400);
        assert_eq!(ledger.native_balance("freelancer").await, 320);
        assert_eq!(ledger.native_balance("platform").await, 80);
        assert!(tracker.milestone(id, 0).await.unwrap().approved);
        assert!(!tracker.all_approved(id).await);
    }

    #[tokio::test]
    async fn approve_requires_completion() {
        let (tracker, _ledger, _clock, id) = tracker_with_milestones(&[500], 500).await;

        let err = tracker.approve_milestone(id, 0, payout()).await.unwrap_err();
        assert!(matches!(err, EscrowError::StateTransition { .. }));
    }

    #[tokio::test]
    async fn double_approval_fails_without_second_settlement() {
        let (tracker, ledger, _clock, id) = tracker_with_milestones(&[500], 500).await;

        tracker.complete_milestone(id, 0).await.unwrap();
        tracker.approve_milestone(id, 0, payout()).await.unwrap();

        let err = tracker.approve_milestone(id, 0, payout()).await.unwrap_err();
        assert!(matches!(err, EscrowError::StateTransition { .. }));
        // Balances unchanged by the failed second approval
        assert_eq!(ledger.native_balance("freelancer").await, 400);
        assert_eq!(ledger.native_balance("platform").await, 100);
    }

    #[tokio::test]
    async fn completion_blocked_after_due_date() {
        let (tracker, _ledger, clock, id) = tracker_with_milestones(&[500], 500).await;

        clock.advance(chrono::Duration::days(8));
        let err = tracker.complete_milestone(id, 0).await.unwrap_err();
        assert!(matches!(err, EscrowError::Deadline(_)));
    }

    #[tokio::test]
    async fn double_completion_rejected() {
        let (tracker, _ledger, _clock, id) = tracker_with_milestones(&[500], 500).await;

        tracker.complete_milestone(id, 0).await.unwrap();
        let err = tracker.complete_milestone(id, 0).await.unwrap_err();
        assert!(matches!(err, EscrowError::StateTransition { .. }));
    }

    #[tokio::test]
    async fn out_of_range_index_is_an_error() {
        let (tracker, _ledger, _clock, id) = tracker_with_milestones(&[500], 500).await;

        assert!(matches!(
            tracker.milestone(id, 3).await,
            Err(EscrowError::MilestoneNotFound { index: 3, .. })
        ));
        assert!(tracker.complete_milestone(id, 3).await.is_err());
    }

    #[tokio::test]
    async fn failed_settlement_rolls_back_approval() {
        // Custody holds less than the milestone amount
        let (tracker, ledger, _clock, id) = tracker_with_milestones(&[500], 100).await;

        tracker.complete_milestone(id, 0).await.unwrap();
        let err = tracker.approve_milestone(id, 0, payout()).await.unwrap_err();
        assert!(matches!(err, EscrowError::Settlement(_)));

        // Approval flag rolled back, nothing settled
        assert!(!tracker.milestone(id, 0).await.unwrap().approved);
        assert_eq!(ledger.native_balance("freelancer").await, 0);
    }

    #[tokio::test]
    async fn all_approved_after_every_milestone() {
        let (tracker, _ledger, _clock, id) = tracker_with_milestones(&[400, 600], 1000).await;

        for index in 0..2 {
            tracker.complete_milestone(id, index).await.unwrap();
            tracker.approve_milestone(id, index, payout()).await.unwrap();
        }
        assert!(tracker.all_approved(id).await);
    }
}
