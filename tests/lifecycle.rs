//! End-to-end escrow lifecycle scenarios

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use uuid::Uuid;

use freelance_escrow::clock::{Clock, ManualClock};
use freelance_escrow::escrow_manager::{CreateEscrowRequest, EscrowManager, EscrowManagerConfig};
use freelance_escrow::milestone_tracker::MilestoneTracker;
use freelance_escrow::models::EscrowStatus;
use freelance_escrow::settings;
use freelance_escrow::settlement::MemoryLedger;

const CUSTODY: &str = "escrow-custody";

fn engine() -> (EscrowManager, Arc<MemoryLedger>, ManualClock) {
    settings::init_tracing();

    let clock = ManualClock::new(Utc::now());
    let ledger = MemoryLedger::new(CUSTODY);
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let tracker = Arc::new(MilestoneTracker::new(ledger.clone(), shared_clock.clone()));
    let manager = EscrowManager::new(
        EscrowManagerConfig {
            fee_percent: 20,
            platform_wallet: "platform".to_string(),
            arbitrator: "arbitrator".to_string(),
            custody_account: CUSTODY.to_string(),
            settlement_token: Some("usd-token".to_string()),
            max_escrow_amount: 1_000_000_000,
        },
        tracker,
        ledger.clone(),
        shared_clock,
    )
    .expect("valid engine config");

    (manager, ledger, clock)
}

fn native_request(clock: &ManualClock, amount: u64) -> CreateEscrowRequest {
    CreateEscrowRequest {
        id: Uuid::new_v4(),
        client: "client".to_string(),
        freelancer: "freelancer".to_string(),
        deadline: clock.now() + Duration::days(14),
        milestone_descriptions: vec![],
        milestone_amounts: vec![],
        milestone_due_dates: vec![],
        use_token: false,
        deposited_value: amount,
    }
}

#[tokio::test]
async fn happy_path_release_pays_exact_split() -> Result<()> {
    let (manager, ledger, clock) = engine();
    ledger.credit_native(CUSTODY, 1000).await;

    let escrow = manager.create_escrow(native_request(&clock, 1000)).await?;
    assert_eq!(escrow.platform_fee, 200);
    assert_eq!(escrow.freelancer_amount, 800);

    manager.complete_work(escrow.id, "freelancer").await?;
    let released = manager.approve_work(escrow.id, "client").await?;

    assert_eq!(released.status, EscrowStatus::Released);
    assert_eq!(ledger.native_balance("freelancer").await, 800);
    assert_eq!(ledger.native_balance("platform").await, 200);
    assert_eq!(ledger.native_balance(CUSTODY).await, 0);

    let events: Vec<String> = manager
        .events_for(escrow.id)
        .await
        .into_iter()
        .map(|event| event.event_type)
        .collect();
    assert_eq!(
        events,
        vec!["escrow.created", "escrow.funded", "work.completed", "funds.released"]
    );

    Ok(())
}

#[tokio::test]
async fn expired_escrow_refunds_in_full() -> Result<()> {
    let (manager, ledger, clock) = engine();
    ledger.credit_native(CUSTODY, 1000).await;

    let escrow = manager.create_escrow(native_request(&clock, 1000)).await?;

    // No approval by the deadline; client reclaims the full amount after it
    clock.set(escrow.deadline + Duration::seconds(1));
    let refunded = manager.request_refund(escrow.id, "client").await?;

    assert_eq!(refunded.status, EscrowStatus::Refunded);
    assert_eq!(ledger.native_balance("client").await, 1000);
    assert_eq!(ledger.native_balance(CUSTODY).await, 0);

    // Work can no longer be approved
    assert!(manager.approve_work(escrow.id, "client").await.is_err());

    Ok(())
}

#[tokio::test]
async fn arbitrated_split_conserves_total_value() -> Result<()> {
    let (manager, ledger, clock) = engine();
    ledger.credit_native(CUSTODY, 1000).await;

    let escrow = manager.create_escrow(native_request(&clock, 1000)).await?;
    manager.start_work(escrow.id, "freelancer").await?;
    manager
        .raise_dispute(escrow.id, "freelancer", "client withholding approval".to_string())
        .await?;

    // 60% of 1000 to the freelancer side, fee-split at 20%
    let resolved = manager
        .resolve_dispute(escrow.id, "arbitrator", true, 60)
        .await?;
    assert_eq!(resolved.status, EscrowStatus::Released);

    let freelancer = ledger.native_balance("freelancer").await;
    let platform = ledger.native_balance("platform").await;
    let client = ledger.native_balance("client").await;
    assert_eq!(freelancer, 480);
    assert_eq!(platform, 120);
    assert_eq!(client, 400);
    assert_eq!(freelancer + platform + client, 1000);

    Ok(())
}

#[tokio::test]
async fn milestone_escrow_settles_the_full_amount_piecemeal() -> Result<()> {
    let (manager, ledger, clock) = engine();
    ledger.credit_native(CUSTODY, 900).await;

    let mut request = native_request(&clock, 900);
    request.milestone_descriptions =
        vec!["design".to_string(), "build".to_string(), "deploy".to_string()];
    request.milestone_amounts = vec![300, 300, 300];
    request.milestone_due_dates = vec![clock.now() + Duration::days(7); 3];
    let escrow = manager.create_escrow(request).await?;

    for index in 0..3 {
        manager.complete_milestone(escrow.id, index, "freelancer").await?;
        manager.approve_milestone(escrow.id, index, "client").await?;
    }

    let settled = manager.escrow(escrow.id).await?;
    assert_eq!(settled.status, EscrowStatus::Released);
    assert_eq!(settled.paid_out, 900);

    // Per-milestone 20% fee: 3 * (240 + 60) = 900
    assert_eq!(ledger.native_balance("freelancer").await, 720);
    assert_eq!(ledger.native_balance("platform").await, 180);
    assert_eq!(ledger.native_balance(CUSTODY).await, 0);

    Ok(())
}

#[tokio::test]
async fn token_escrow_lifecycle_through_allowance() -> Result<()> {
    let (manager, ledger, clock) = engine();
    ledger.credit_token("usd-token", "client", 5000).await;
    ledger.approve("usd-token", "client", CUSTODY, 5000).await;

    let mut request = native_request(&clock, 0);
    request.use_token = true;
    let escrow = manager.create_escrow(request).await?;
    assert_eq!(escrow.amount, 5000);
    assert_eq!(ledger.token_balance("usd-token", CUSTODY).await, 5000);

    manager.complete_work(escrow.id, "freelancer").await?;
    manager.approve_work(escrow.id, "client").await?;

    assert_eq!(ledger.token_balance("usd-token", "freelancer").await, 4000);
    assert_eq!(ledger.token_balance("usd-token", "platform").await, 1000);
    assert_eq!(ledger.token_balance("usd-token", CUSTODY).await, 0);

    Ok(())
}
