use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;

use referral_ledger::money::{commission_amount, parse_amount};
use referral_ledger::referral::types::NewUser;
use referral_ledger::referral::{CommissionFilter, CommissionKind};
use referral_ledger::{
    CommissionRates, CommissionStatus, MemoryReferralStore, PaymentEvent, ReferralError,
    ReferralLedger,
};

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Ledger with users 1..=depth+1 where user k+1 was referred by user k
async fn chain_ledger(depth: u64) -> ReferralLedger {
    let ledger = ReferralLedger::new(
        Arc::new(MemoryReferralStore::new()),
        CommissionRates::standard(),
    );
    ledger.register_user(NewUser::new(1)).await.unwrap();
    for id in 2..=depth + 1 {
        ledger
            .register_user(NewUser::new(id).referred_by(id - 1))
            .await
            .unwrap();
    }
    ledger
}

#[tokio::test]
async fn prop_entries_never_exceed_three_levels() {
    for depth in 0..=6u64 {
        let ledger = chain_ledger(depth).await;
        let payer = depth + 1;
        let outcome = ledger
            .process_payment(&PaymentEvent::succeeded(format!("pi_{}", depth), payer, d("10.00")))
            .await
            .unwrap();

        assert_eq!(outcome.entries.len() as u64, depth.min(3), "depth {}", depth);
        for (idx, entry) in outcome.entries.iter().enumerate() {
            assert_eq!(entry.level as usize, idx + 1);
            assert_eq!(entry.beneficiary_id, payer - 1 - idx as u64);
        }
    }
}

#[tokio::test]
async fn prop_total_bounded_by_rate_sum_plus_rounding() {
    let ledger = chain_ledger(3).await;
    let amounts = [
        "0.01", "0.05", "0.29", "1.00", "3.33", "9.99", "12.35", "99.95", "100.00", "333.33",
        "4999.99",
    ];

    for (i, amount) in amounts.iter().enumerate() {
        let a = parse_amount(amount).unwrap();
        let outcome = ledger
            .process_payment(&PaymentEvent::succeeded(format!("pi_sum_{}", i), 4, a))
            .await
            .unwrap();

        let total: Decimal = outcome.entries.iter().map(|e| e.amount).sum();
        // at most half a cent of rounding per level
        assert!(
            total <= a * d("0.17") + d("0.015"),
            "amount {} produced {}",
            amount,
            total
        );
        for entry in &outcome.entries {
            assert_eq!(entry.amount, commission_amount(a, entry.rate));
            assert!(!entry.amount.is_sign_negative());
        }
    }
}

#[tokio::test]
async fn prop_processing_twice_equals_once() {
    let ledger = chain_ledger(3).await;
    let event = PaymentEvent::succeeded("pi_twice", 4, d("42.42"));

    let once = ledger.process_payment(&event).await.unwrap();
    let all_once = ledger
        .query_commissions(&CommissionFilter::default())
        .await
        .unwrap();

    let twice = ledger.process_payment(&event).await.unwrap();
    let all_twice = ledger
        .query_commissions(&CommissionFilter::default())
        .await
        .unwrap();

    assert_eq!(once.entries, twice.entries);
    assert_eq!(all_once, all_twice);
}

#[tokio::test]
async fn prop_referral_link_unique_per_pair() {
    let ledger = chain_ledger(3).await;
    for i in 0..5 {
        ledger
            .process_payment(&PaymentEvent::succeeded(format!("pi_link_{}", i), 4, d("5.00")))
            .await
            .unwrap();
    }

    for referrer in 1..=3 {
        let links = ledger.referrals_for(referrer).await.unwrap();
        assert_eq!(links.len(), 1, "referrer {}", referrer);
        assert_eq!(links[0].referred_user_id, 4);
        assert_eq!(links[0].level as u64, 4 - referrer);
    }
}

#[tokio::test]
async fn prop_chargeback_is_idempotent() {
    let ledger = chain_ledger(3).await;
    let entries = ledger
        .process_payment(&PaymentEvent::succeeded("pi_cb", 4, d("200.00")))
        .await
        .unwrap()
        .entries;

    // L1 paid, L2 approved, L3 pending
    for status in [CommissionStatus::Approved, CommissionStatus::Paid] {
        ledger
            .transition_commission(entries[0].id, status, None)
            .await
            .unwrap();
    }
    ledger
        .transition_commission(entries[1].id, CommissionStatus::Approved, None)
        .await
        .unwrap();

    let first = ledger.reverse_for_chargeback("pi_cb").await.unwrap();
    assert_eq!(first.reversals.len(), 1);
    assert_eq!(first.rejected.len(), 2);

    for _ in 0..3 {
        assert!(ledger.reverse_for_chargeback("pi_cb").await.unwrap().is_noop());
    }

    let reversals = ledger
        .query_commissions(&CommissionFilter::for_transaction("pi_cb").kind(CommissionKind::Reversal))
        .await
        .unwrap();
    assert_eq!(reversals.len(), 1);
    assert_eq!(reversals[0].amount, -entries[0].amount);

    // Net effect for the paid beneficiary is zero
    let stats = ledger.referral_stats(entries[0].beneficiary_id).await.unwrap();
    assert_eq!(stats.net_paid_total, Decimal::ZERO);
}

#[tokio::test]
async fn prop_illegal_transitions_preserve_state() {
    let ledger = chain_ledger(1).await;
    let entry = ledger
        .process_payment(&PaymentEvent::succeeded("pi_fsm", 2, d("10.00")))
        .await
        .unwrap()
        .entries
        .remove(0);

    let illegal = [CommissionStatus::Paid, CommissionStatus::Pending];
    for to in illegal {
        let err = ledger
            .transition_commission(entry.id, to, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::InvalidStateTransition { .. }));
    }

    let current = ledger
        .list_commissions(1, None)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(current.status, CommissionStatus::Pending);
    assert_eq!(current.updated_at, entry.updated_at);
}
