//! Escrow Manager - Drives the escrow lifecycle state machine
//!
//! This module coordinates the complete lifecycle of an escrow from funded
//! creation through work, completion, release, refund, dispute resolution,
//! and emergency recovery. It owns the escrow and dispute records, delegates
//! milestone bookkeeping to the `MilestoneTracker`, and uses the fee library
//! for all arithmetic.
//!
//! Every mutating operation serializes on an engine-wide lock. Within an
//! operation, internal state is committed before any outgoing settlement
//! call, so a reentrant call observes the post-transition status and fails on
//! the normal guard clauses; a failed settlement rolls the mutation back so
//! failures stay atomic and total.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::EscrowResult;
use crate::clock::Clock;
use crate::error::EscrowError;
use crate::fees;
use crate::milestone_tracker::{MilestonePayout, MilestoneTracker};
use crate::models::{Dispute, Escrow, EscrowEvent, EscrowStatus, Milestone, SettlementKind};
use crate::settlement::Settlement;

/// Hard cap on the platform fee percentage
pub const MAX_FEE_PERCENT: u8 = 30;

/// Configuration for the escrow manager
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EscrowManagerConfig {
    /// Platform fee percentage (0..=30)
    pub fee_percent: u8,
    /// Account receiving platform fees
    pub platform_wallet: String,
    /// Privileged identity for disputes and recovery
    pub arbitrator: String,
    /// Account holding custodied funds on the settlement layer; also the
    /// allowance spender for token funding
    pub custody_account: String,
    /// Default token handle for token escrows
    pub settlement_token: Option<String>,
    /// Maximum escrow amount in smallest currency units
    pub max_escrow_amount: u64,
}

impl Default for EscrowManagerConfig {
    fn default() -> Self {
        Self {
            fee_percent: 10,
            platform_wallet: "platform".to_string(),
            arbitrator: "arbitrator".to_string(),
            custody_account: "escrow-custody".to_string(),
            settlement_token: None,
            max_escrow_amount: 1_000_000_000_000,
        }
    }
}

/// Mutable administrative state
#[derive(Debug, Clone)]
struct AdminState {
    fee_percent: u8,
    platform_wallet: String,
    settlement_token: Option<String>,
    paused: bool,
}

/// Escrow creation request
#[derive(Debug, Clone)]
pub struct CreateEscrowRequest {
    /// Caller-supplied identifier, unique per active agreement
    pub id: Uuid,
    pub client: String,
    pub freelancer: String,
    pub deadline: DateTime<Utc>,
    pub milestone_descriptions: Vec<String>,
    pub milestone_amounts: Vec<u64>,
    pub milestone_due_dates: Vec<DateTime<Utc>>,
    /// Settle in the configured fungible token instead of native currency
    pub use_token: bool,
    /// Attached value for native escrows
    pub deposited_value: u64,
}

/// Main escrow manager that coordinates the lifecycle state machine
pub struct EscrowManager {
    arbitrator: String,
    custody_account: String,
    max_escrow_amount: u64,
    admin: RwLock<AdminState>,
    /// In-memory escrow storage (in production, this would be a database)
    escrows: RwLock<HashMap<Uuid, Escrow>>,
    disputes: RwLock<HashMap<Uuid, Dispute>>,
    events: RwLock<Vec<EscrowEvent>>,
    /// Escrow ids per participant identity
    participant_escrows: RwLock<HashMap<String, Vec<Uuid>>>,
    tracker: Arc<MilestoneTracker>,
    settlement: Arc<dyn Settlement>,
    clock: Arc<dyn Clock>,
    /// Serializes mutating operations; second line of reentrancy defense
    op_lock: Mutex<()>,
}

impl EscrowManager {
    /// Create a new escrow manager
    pub fn new(
        config: EscrowManagerConfig,
        tracker: Arc<MilestoneTracker>,
        settlement: Arc<dyn Settlement>,
        clock: Arc<dyn Clock>,
    ) -> EscrowResult<Self> {
        if config.fee_percent > MAX_FEE_PERCENT {
            return Err(EscrowError::validation(format!(
                "Fee percent {} exceeds maximum {}",
                config.fee_percent, MAX_FEE_PERCENT
            )));
        }
        if !fees::is_valid_address(&config.platform_wallet) {
            return Err(EscrowError::validation("Invalid platform wallet"));
        }
        if !fees::is_valid_address(&config.arbitrator) {
            return Err(EscrowError::validation("Invalid arbitrator identity"));
        }

        Ok(Self {
            arbitrator: config.arbitrator,
            custody_account: config.custody_account,
            max_escrow_amount: config.max_escrow_amount,
            admin: RwLock::new(AdminState {
                fee_percent: config.fee_percent,
                platform_wallet: config.platform_wallet,
                settlement_token: config.settlement_token,
                paused: false,
            }),
            escrows: RwLock::new(HashMap::new()),
            disputes: RwLock::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
            participant_escrows: RwLock::new(HashMap::new()),
            tracker,
            settlement,
            clock,
            op_lock: Mutex::new(()),
        })
    }

    /// Create and fund an escrow atomically
    ///
    /// Token escrows are funded from the milestone total, or from the
    /// client's pre-authorized allowance when no milestones are supplied;
    /// native escrows take the attached `deposited_value`. All validation
    /// runs before any token pull, so a failure has no side effect.
    pub async fn create_escrow(&self, request: CreateEscrowRequest) -> EscrowResult<Escrow> {
        let _guard = self.op_lock.lock().await;
        self.ensure_active().await?;

        let now = self.clock.now();
        info!("Creating escrow {} for client {}", request.id, request.client);

        if !fees::is_valid_address(&request.client) {
            return Err(EscrowError::validation("Invalid client identity"));
        }
        if !fees::is_valid_address(&request.freelancer) {
            return Err(EscrowError::validation("Invalid freelancer identity"));
        }
        if request.client == request.freelancer {
            return Err(EscrowError::validation(
                "Client and freelancer must be distinct",
            ));
        }
        if !fees::is_deadline_valid(request.deadline, now) {
            return Err(EscrowError::deadline("Deadline must be in the future"));
        }
        if self.escrows.read().await.contains_key(&request.id) {
            return Err(EscrowError::validation(format!(
                "Escrow {} already exists",
                request.id
            )));
        }

        fees::validate_milestone_arrays(
            request.milestone_descriptions.len(),
            request.milestone_amounts.len(),
            request.milestone_due_dates.len(),
        )?;
        let milestone_total = fees::calculate_total_amount(&request.milestone_amounts)?;
        let has_milestones = !request.milestone_amounts.is_empty();

        let admin = self.admin.read().await.clone();
        let (kind, token) = if request.use_token {
            let token = admin
                .settlement_token
                .clone()
                .ok_or_else(|| EscrowError::validation("No settlement token configured"))?;
            (SettlementKind::Token, Some(token))
        } else {
            (SettlementKind::Native, None)
        };

        let amount = match kind {
            SettlementKind::Token => {
                if has_milestones {
                    milestone_total
                } else {
                    let token = token.as_deref().unwrap_or_default();
                    self.settlement
                        .allowance(token, &request.client, &self.custody_account)
                        .await?
                }
            }
            SettlementKind::Native => request.deposited_value,
        };

        if amount == 0 {
            return Err(EscrowError::validation("Deposited amount must be nonzero"));
        }
        if amount > self.max_escrow_amount {
            return Err(EscrowError::validation(format!(
                "Amount {} exceeds maximum {}",
                amount, self.max_escrow_amount
            )));
        }
        if has_milestones && milestone_total != amount {
            return Err(EscrowError::validation(format!(
                "Milestone amounts sum to {milestone_total}, escrow amount is {amount}"
            )));
        }

        // Inbound funding pull happens before any record is committed; a
        // failed pull aborts with zero state change.
        if let (SettlementKind::Token, Some(token)) = (kind, token.as_deref()) {
            self.settlement
                .transfer_token_from(token, &request.client, &self.custody_account, amount)
                .await?;
        }

        let split = fees::calculate_fee(amount, admin.fee_percent)?;
        let escrow = Escrow::new(
            request.id,
            request.client.clone(),
            request.freelancer.clone(),
            amount,
            split.fee,
            split.remainder,
            kind,
            token,
            request.deadline,
            now,
        );

        self.escrows.write().await.insert(escrow.id, escrow.clone());
        if has_milestones {
            self.tracker
                .add_milestones(
                    escrow.id,
                    request.milestone_descriptions,
                    request.milestone_amounts,
                    request.milestone_due_dates,
                )
                .await;
        }
        {
            let mut index = self.participant_escrows.write().await;
            index.entry(request.client.clone()).or_default().push(escrow.id);
            index
                .entry(request.freelancer.clone())
                .or_default()
                .push(escrow.id);
        }

        self.record_event(
            "escrow.created",
            escrow.id,
            Some(request.client.clone()),
            Some(amount),
            Some(serde_json::json!({
                "freelancer": request.freelancer,
                "deadline": request.deadline,
                "milestones": self.tracker.milestone_count(escrow.id).await,
            })),
        )
        .await;
        self.record_event(
            "escrow.funded",
            escrow.id,
            Some(request.client),
            Some(amount),
            Some(serde_json::json!({
                "platform_fee": split.fee,
                "freelancer_amount": split.remainder,
            })),
        )
        .await;

        info!("Created escrow {} for {} units", escrow.id, amount);

        Ok(escrow)
    }

    /// Freelancer starts work on a funded escrow
    pub async fn start_work(&self, id: Uuid, caller: &str) -> EscrowResult<Escrow> {
        let _guard = self.op_lock.lock().await;

        let mut escrow = self.get_escrow(id).await?;
        if caller != escrow.freelancer {
            return Err(EscrowError::unauthorized(
                "Only the freelancer can start work",
            ));
        }
        if !escrow.status.can_start_work() {
            return Err(EscrowError::state_transition(
                format!("{:?}", escrow.status),
                "WorkInProgress".to_string(),
                "Work can only start on a funded escrow".to_string(),
            ));
        }

        escrow.validate_transition(EscrowStatus::WorkInProgress)?;
        escrow.status = EscrowStatus::WorkInProgress;
        escrow.updated_at = self.clock.now();
        self.escrows.write().await.insert(id, escrow.clone());

        self.record_event("work.started", id, Some(caller.to_string()), None, None)
            .await;

        Ok(escrow)
    }

    /// Freelancer marks the work complete, before the deadline
    pub async fn complete_work(&self, id: Uuid, caller: &str) -> EscrowResult<Escrow> {
        let _guard = self.op_lock.lock().await;

        let now = self.clock.now();
        let mut escrow = self.get_escrow(id).await?;
        if caller != escrow.freelancer {
            return Err(EscrowError::unauthorized(
                "Only the freelancer can complete work",
            ));
        }
        if !escrow.status.can_complete_work() {
            return Err(EscrowError::state_transition(
                format!("{:?}", escrow.status),
                "WorkCompleted".to_string(),
                "Work can only be completed while funded or in progress".to_string(),
            ));
        }
        if now > escrow.deadline {
            return Err(EscrowError::deadline(
                "Deadline has passed; the client may request a refund",
            ));
        }

        escrow.validate_transition(EscrowStatus::WorkCompleted)?;
        escrow.status = EscrowStatus::WorkCompleted;
        escrow.freelancer_completed = true;
        escrow.updated_at = now;
        self.escrows.write().await.insert(id, escrow.clone());

        self.record_event("work.completed", id, Some(caller.to_string()), None, None)
            .await;

        info!("Work completed on escrow {}", id);

        Ok(escrow)
    }

    /// Client approves completed work, releasing the funds
    pub async fn approve_work(&self, id: Uuid, caller: &str) -> EscrowResult<Escrow> {
        let _guard = self.op_lock.lock().await;
        self.ensure_active().await?;

        let mut escrow = self.get_escrow(id).await?;
        if caller != escrow.client {
            return Err(EscrowError::unauthorized("Only the client can approve work"));
        }
        if !escrow.status.can_approve_work() {
            return Err(EscrowError::state_transition(
                format!("{:?}", escrow.status),
                "Released".to_string(),
                "Only completed work can be approved".to_string(),
            ));
        }
        if self.tracker.has_milestones(id).await {
            return Err(EscrowError::state_transition(
                format!("{:?}", escrow.status),
                "Released".to_string(),
                "Milestone escrows are settled per milestone".to_string(),
            ));
        }

        escrow.client_approved = true;
        self.release_funds(&mut escrow).await?;

        Ok(escrow)
    }

    /// Internal release procedure for a normal (non-disputed) payout
    async fn release_funds(&self, escrow: &mut Escrow) -> EscrowResult<()> {
        // Re-validate; the only normal path out of custody to the freelancer
        escrow.validate_transition(EscrowStatus::Released)?;

        let rollback = escrow.clone();
        escrow.status = EscrowStatus::Released;
        escrow.paid_out = escrow.amount;
        escrow.updated_at = self.clock.now();
        self.escrows.write().await.insert(escrow.id, escrow.clone());

        let payouts = [
            (escrow.freelancer.clone(), escrow.freelancer_amount),
            (self.admin.read().await.platform_wallet.clone(), escrow.platform_fee),
        ];
        if let Err(err) = self.settle_batch(escrow, &payouts).await {
            warn!("Release settlement failed for escrow {}: {}", escrow.id, err);
            self.escrows.write().await.insert(rollback.id, rollback.clone());
            *escrow = rollback;
            return Err(err);
        }

        self.record_event(
            "funds.released",
            escrow.id,
            Some(escrow.client.clone()),
            Some(escrow.amount),
            Some(serde_json::json!({
                "freelancer_amount": escrow.freelancer_amount,
                "platform_fee": escrow.platform_fee,
            })),
        )
        .await;

        info!(
            "Released escrow {}: {} to freelancer, {} platform fee",
            escrow.id, escrow.freelancer_amount, escrow.platform_fee
        );

        Ok(())
    }

    /// Client reclaims the deposit after the deadline has passed
    pub async fn request_refund(&self, id: Uuid, caller: &str) -> EscrowResult<Escrow> {
        let _guard = self.op_lock.lock().await;
        self.ensure_active().await?;

        let now = self.clock.now();
        let mut escrow = self.get_escrow(id).await?;
        if caller != escrow.client {
            return Err(EscrowError::unauthorized(
                "Only the client can request a refund",
            ));
        }
        if !escrow.status.can_refund() {
            return Err(EscrowError::state_transition(
                format!("{:?}", escrow.status),
                "Refunded".to_string(),
                "Refunds apply to funded or in-progress escrows".to_string(),
            ));
        }
        if now <= escrow.deadline {
            return Err(EscrowError::deadline("Deadline has not yet passed"));
        }

        let refund = escrow.remaining();
        let rollback = escrow.clone();
        escrow.validate_transition(EscrowStatus::Refunded)?;
        escrow.status = EscrowStatus::Refunded;
        escrow.paid_out = escrow.amount;
        escrow.updated_at = now;
        self.escrows.write().await.insert(id, escrow.clone());

        let payouts = [(escrow.client.clone(), refund)];
        if let Err(err) = self.settle_batch(&escrow, &payouts).await {
            warn!("Refund settlement failed for escrow {}: {}", id, err);
            self.escrows.write().await.insert(id, rollback.clone());
            return Err(err);
        }

        self.record_event(
            "funds.refunded",
            id,
            Some(caller.to_string()),
            Some(refund),
            None,
        )
        .await;

        info!("Refunded escrow {}: {} to client", id, refund);

        Ok(escrow)
    }

    /// Either party raises a dispute
    pub async fn raise_dispute(&self, id: Uuid, caller: &str, reason: String) -> EscrowResult<Dispute> {
        let _guard = self.op_lock.lock().await;

        let mut escrow = self.get_escrow(id).await?;
        if caller != escrow.client && caller != escrow.freelancer {
            return Err(EscrowError::unauthorized(
                "Only the client or freelancer can raise a dispute",
            ));
        }
        if !escrow.status.can_dispute() {
            return Err(EscrowError::state_transition(
                format!("{:?}", escrow.status),
                "Disputed".to_string(),
                "Disputes apply to in-progress or completed work".to_string(),
            ));
        }
        if let Some(existing) = self.disputes.read().await.get(&id) {
            // A resolved dispute is final; an unresolved one is never
            // silently overwritten.
            return Err(if existing.resolved {
                EscrowError::dispute("Dispute already resolved for this escrow")
            } else {
                EscrowError::dispute("Dispute already pending for this escrow")
            });
        }

        let now = self.clock.now();
        escrow.validate_transition(EscrowStatus::Disputed)?;
        escrow.status = EscrowStatus::Disputed;
        escrow.updated_at = now;
        self.escrows.write().await.insert(id, escrow);

        let dispute = Dispute::new(id, caller.to_string(), reason.clone(), now);
        self.disputes.write().await.insert(id, dispute.clone());

        self.record_event(
            "dispute.raised",
            id,
            Some(caller.to_string()),
            None,
            Some(serde_json::json!({ "reason": reason })),
        )
        .await;

        warn!("Dispute raised on escrow {} by {}", id, caller);

        Ok(dispute)
    }

    /// Arbitrator resolves a dispute with an arbitrary split
    ///
    /// With `release_to_freelancer`, the remaining balance is split by
    /// `freelancer_percentage`; the freelancer-bound share carries the
    /// platform fee, the rest refunds the client. Otherwise the remaining
    /// balance refunds the client in full. Zero-amount transfers are skipped.
    pub async fn resolve_dispute(
        &self,
        id: Uuid,
        caller: &str,
        release_to_freelancer: bool,
        freelancer_percentage: u8,
    ) -> EscrowResult<Escrow> {
        let _guard = self.op_lock.lock().await;
        self.ensure_active().await?;

        let now = self.clock.now();
        let mut escrow = self.get_escrow(id).await?;
        if caller != self.arbitrator {
            return Err(EscrowError::unauthorized(
                "Only the arbitrator can resolve disputes",
            ));
        }
        if !escrow.status.can_resolve() {
            return Err(EscrowError::state_transition(
                format!("{:?}", escrow.status),
                "Released".to_string(),
                "Only disputed escrows can be resolved".to_string(),
            ));
        }
        if freelancer_percentage > 100 {
            return Err(EscrowError::validation(
                "Freelancer percentage must be within 0..=100",
            ));
        }
        let mut dispute = self
            .disputes
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EscrowError::dispute("No dispute recorded for this escrow"))?;

        let remaining = escrow.remaining();
        let admin = self.admin.read().await.clone();
        let rollback = escrow.clone();

        let (to_status, payouts) = if release_to_freelancer {
            let gross =
                (u128::from(remaining) * u128::from(freelancer_percentage) / 100) as u64;
            let client_refund = remaining - gross;
            let split = fees::calculate_fee(gross, admin.fee_percent)?;
            (
                EscrowStatus::Released,
                vec![
                    (escrow.freelancer.clone(), split.remainder),
                    (escrow.client.clone(), client_refund),
                    (admin.platform_wallet.clone(), split.fee),
                ],
            )
        } else {
            (
                EscrowStatus::Refunded,
                vec![(escrow.client.clone(), remaining)],
            )
        };

        escrow.validate_transition(to_status)?;
        escrow.status = to_status;
        escrow.paid_out = escrow.amount;
        escrow.updated_at = now;
        self.escrows.write().await.insert(id, escrow.clone());

        dispute.resolved = true;
        dispute.resolved_by = Some(caller.to_string());
        dispute.resolved_at = Some(now);
        self.disputes.write().await.insert(id, dispute.clone());

        if let Err(err) = self.settle_batch(&escrow, &payouts).await {
            warn!("Dispute settlement failed for escrow {}: {}", id, err);
            self.escrows.write().await.insert(id, rollback.clone());
            let mut disputes = self.disputes.write().await;
            if let Some(pending) = disputes.get_mut(&id) {
                pending.resolved = false;
                pending.resolved_by = None;
                pending.resolved_at = None;
            }
            return Err(err);
        }

        self.record_event(
            "dispute.resolved",
            id,
            Some(caller.to_string()),
            Some(remaining),
            Some(serde_json::json!({
                "release_to_freelancer": release_to_freelancer,
                "freelancer_percentage": freelancer_percentage,
                "final_status": format!("{:?}", escrow.status),
            })),
        )
        .await;

        info!(
            "Resolved dispute on escrow {} ({:?}, freelancer {}%)",
            id, escrow.status, freelancer_percentage
        );

        Ok(escrow)
    }

    /// Administrative recovery: sweep the remaining balance to the arbitrator
    ///
    /// Overrides any status and bypasses dispute state; intended for
    /// stuck-fund recovery only.
    pub async fn emergency_withdraw(&self, id: Uuid, caller: &str) -> EscrowResult<Escrow> {
        let _guard = self.op_lock.lock().await;

        let mut escrow = self.get_escrow(id).await?;
        if caller != self.arbitrator {
            return Err(EscrowError::unauthorized(
                "Only the arbitrator can perform an emergency withdrawal",
            ));
        }
        let swept = escrow.remaining();
        if swept == 0 {
            return Err(EscrowError::validation("Escrow holds no funds"));
        }

        let rollback = escrow.clone();
        escrow.validate_transition(EscrowStatus::Cancelled)?;
        escrow.status = EscrowStatus::Cancelled;
        escrow.amount = 0;
        escrow.platform_fee = 0;
        escrow.freelancer_amount = 0;
        escrow.paid_out = 0;
        escrow.updated_at = self.clock.now();
        self.escrows.write().await.insert(id, escrow.clone());

        let payouts = [(self.arbitrator.clone(), swept)];
        if let Err(err) = self.settle_batch(&escrow, &payouts).await {
            warn!("Emergency sweep failed for escrow {}: {}", id, err);
            self.escrows.write().await.insert(id, rollback.clone());
            return Err(err);
        }

        self.record_event(
            "escrow.cancelled",
            id,
            Some(caller.to_string()),
            Some(swept),
            None,
        )
        .await;

        warn!("Emergency withdrawal of {} units from escrow {}", swept, id);

        Ok(escrow)
    }

    /// Freelancer marks a milestone complete
    pub async fn complete_milestone(
        &self,
        id: Uuid,
        index: usize,
        caller: &str,
    ) -> EscrowResult<Milestone> {
        let _guard = self.op_lock.lock().await;

        let escrow = self.get_escrow(id).await?;
        if caller != escrow.freelancer {
            return Err(EscrowError::unauthorized(
                "Only the freelancer can complete a milestone",
            ));
        }
        if escrow.status.is_terminal() || escrow.status == EscrowStatus::Disputed {
            return Err(EscrowError::state_transition(
                format!("{:?}", escrow.status),
                format!("{:?}", escrow.status),
                "Milestones are frozen in this status".to_string(),
            ));
        }

        let milestone = self.tracker.complete_milestone(id, index).await?;

        self.record_event(
            "milestone.completed",
            id,
            Some(caller.to_string()),
            Some(milestone.amount),
            Some(serde_json::json!({ "index": index })),
        )
        .await;

        Ok(milestone)
    }

    /// Client approves a completed milestone, paying out its portion
    ///
    /// Approving the final milestone settles the escrow and transitions it
    /// to `Released`.
    pub async fn approve_milestone(
        &self,
        id: Uuid,
        index: usize,
        caller: &str,
    ) -> EscrowResult<Escrow> {
        let _guard = self.op_lock.lock().await;
        self.ensure_active().await?;

        let mut escrow = self.get_escrow(id).await?;
        if caller != escrow.client {
            return Err(EscrowError::unauthorized(
                "Only the client can approve a milestone",
            ));
        }
        if escrow.status.is_terminal() || escrow.status == EscrowStatus::Disputed {
            return Err(EscrowError::state_transition(
                format!("{:?}", escrow.status),
                format!("{:?}", escrow.status),
                "Milestones are frozen in this status".to_string(),
            ));
        }

        let admin = self.admin.read().await.clone();
        let paid = self
            .tracker
            .approve_milestone(
                id,
                index,
                MilestonePayout {
                    freelancer: escrow.freelancer.clone(),
                    platform_wallet: admin.platform_wallet,
                    fee_percent: admin.fee_percent,
                    token: escrow.token.clone(),
                    kind: escrow.settlement,
                },
            )
            .await?;

        escrow.paid_out = escrow.paid_out.saturating_add(paid);
        escrow.updated_at = self.clock.now();
        let fully_settled = self.tracker.all_approved(id).await;
        if fully_settled {
            escrow.status = EscrowStatus::Released;
            escrow.client_approved = true;
        }
        self.escrows.write().await.insert(id, escrow.clone());

        self.record_event(
            "milestone.approved",
            id,
            Some(caller.to_string()),
            Some(paid),
            Some(serde_json::json!({ "index": index })),
        )
        .await;
        if fully_settled {
            self.record_event(
                "funds.released",
                id,
                Some(caller.to_string()),
                Some(escrow.amount),
                Some(serde_json::json!({ "via_milestones": true })),
            )
            .await;
            info!("Escrow {} fully settled via milestones", id);
        }

        Ok(escrow)
    }

    // --- Administrative surface, arbitrator-gated ---

    /// Set the platform fee percentage (capped at 30)
    pub async fn set_fee_percent(&self, caller: &str, fee_percent: u8) -> EscrowResult<()> {
        self.ensure_arbitrator(caller)?;
        if fee_percent > MAX_FEE_PERCENT {
            return Err(EscrowError::validation(format!(
                "Fee percent {fee_percent} exceeds maximum {MAX_FEE_PERCENT}"
            )));
        }
        self.admin.write().await.fee_percent = fee_percent;
        info!("Platform fee set to {}%", fee_percent);
        Ok(())
    }

    /// Set the platform fee wallet
    pub async fn set_platform_wallet(&self, caller: &str, wallet: String) -> EscrowResult<()> {
        self.ensure_arbitrator(caller)?;
        if !fees::is_valid_address(&wallet) {
            return Err(EscrowError::validation("Invalid platform wallet"));
        }
        self.admin.write().await.platform_wallet = wallet;
        Ok(())
    }

    /// Set the settlement token handle used by new token escrows
    pub async fn set_settlement_token(&self, caller: &str, token: String) -> EscrowResult<()> {
        self.ensure_arbitrator(caller)?;
        if !fees::is_valid_address(&token) {
            return Err(EscrowError::validation("Invalid token handle"));
        }
        self.admin.write().await.settlement_token = Some(token);
        Ok(())
    }

    /// Suspend all funds-moving operations; reads stay available
    pub async fn pause(&self, caller: &str) -> EscrowResult<()> {
        self.ensure_arbitrator(caller)?;
        self.admin.write().await.paused = true;
        warn!("Escrow manager paused");
        Ok(())
    }

    /// Resume funds-moving operations
    pub async fn unpause(&self, caller: &str) -> EscrowResult<()> {
        self.ensure_arbitrator(caller)?;
        self.admin.write().await.paused = false;
        info!("Escrow manager unpaused");
        Ok(())
    }

    // --- Read accessors ---

    /// Get an escrow by id
    pub async fn escrow(&self, id: Uuid) -> EscrowResult<Escrow> {
        self.get_escrow(id).await
    }

    /// Get the dispute for an escrow
    pub async fn dispute(&self, id: Uuid) -> EscrowResult<Dispute> {
        self.disputes
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EscrowError::dispute(format!("No dispute for escrow {id}")))
    }

    /// Audit entries for one escrow
    pub async fn events_for(&self, id: Uuid) -> Vec<EscrowEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| event.escrow_id == id)
            .cloned()
            .collect()
    }

    /// All escrows a participant is party to
    pub async fn escrows_for(&self, participant: &str) -> Vec<Escrow> {
        let index = self.participant_escrows.read().await;
        let escrows = self.escrows.read().await;
        index
            .get(participant)
            .into_iter()
            .flatten()
            .filter_map(|id| escrows.get(id))
            .cloned()
            .collect()
    }

    /// Total number of escrows ever created
    pub async fn escrow_count(&self) -> usize {
        self.escrows.read().await.len()
    }

    /// Milestone sequence for an escrow
    pub async fn milestones(&self, id: Uuid) -> Vec<Milestone> {
        self.tracker.milestones(id).await
    }

    /// One milestone by index
    pub async fn milestone(&self, id: Uuid, index: usize) -> EscrowResult<Milestone> {
        self.tracker.milestone(id, index).await
    }

    /// Current fee percentage
    pub async fn fee_percent(&self) -> u8 {
        self.admin.read().await.fee_percent
    }

    /// Whether funds-moving operations are suspended
    pub async fn is_paused(&self) -> bool {
        self.admin.read().await.paused
    }

    // --- Internals ---

    async fn get_escrow(&self, id: Uuid) -> EscrowResult<Escrow> {
        self.escrows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EscrowError::EscrowNotFound(id))
    }

    async fn ensure_active(&self) -> EscrowResult<()> {
        if self.admin.read().await.paused {
            return Err(EscrowError::Paused);
        }
        Ok(())
    }

    fn ensure_arbitrator(&self, caller: &str) -> EscrowResult<()> {
        if caller != self.arbitrator {
            return Err(EscrowError::unauthorized(
                "Only the arbitrator can perform this operation",
            ));
        }
        Ok(())
    }

    /// Issue a batch of payouts on the escrow's settlement rail, skipping
    /// zero amounts
    async fn settle_batch(&self, escrow: &Escrow, payouts: &[(String, u64)]) -> EscrowResult<()> {
        for (to, amount) in payouts {
            if *amount == 0 {
                continue;
            }
            match escrow.settlement {
                SettlementKind::Native => {
                    self.settlement.transfer_native(to, *amount).await?;
                }
                SettlementKind::Token => {
                    let token = escrow
                        .token
                        .as_deref()
                        .ok_or_else(|| EscrowError::validation("Token escrow has no token handle"))?;
                    self.settlement.transfer_token(token, to, *amount).await?;
                }
            }
        }
        Ok(())
    }

    /// Append an audit entry
    async fn record_event(
        &self,
        event_type: &str,
        escrow_id: Uuid,
        actor: Option<String>,
        amount: Option<u64>,
        metadata: Option<serde_json::Value>,
    ) {
        self.events.write().await.push(EscrowEvent {
            event_type: event_type.to_string(),
            escrow_id,
            actor,
            amount,
            metadata,
            created_at: self.clock.now(),
        });
    }
}
