//! Random operation sequences never break the seat counter.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use seatkeeper_core::types::{Money, UserId};
use seatkeeper_testing::TestHarness;

const USERS: usize = 5;
const PRICE: u64 = 2_000;

#[derive(Debug, Clone)]
enum Op {
    Register(usize),
    Approve(usize),
    Reject(usize),
    Unregister(usize),
    Checkout(usize, u32),
    Settle(usize, &'static str),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let user = 0..USERS;
    let status = prop::sample::select(vec!["DONE", "EXPIRED", "IN_PROGRESS", "CANCELED"]);
    prop_oneof![
        user.clone().prop_map(Op::Register),
        user.clone().prop_map(Op::Approve),
        user.clone().prop_map(Op::Reject),
        user.clone().prop_map(Op::Unregister),
        (user, 1..4u32).prop_map(|(u, q)| Op::Checkout(u, q)),
        (0..8usize, status).prop_map(|(p, s)| Op::Settle(p, s)),
    ]
}

struct Outcome {
    free_count: u32,
    free_capacity: Option<u32>,
    paid_count: u32,
    paid_capacity: Option<u32>,
    consistent: bool,
    unexpected: Vec<String>,
}

async fn run(capacity: Option<u32>, require_approval: bool, ops: Vec<Op>) -> Outcome {
    let h = TestHarness::new();
    let free = h.free_event(capacity, require_approval).await;
    let paid = h.paid_event(capacity, PRICE).await;
    let users: Vec<UserId> = (0..USERS).map(|_| UserId::new()).collect();
    let mut references = Vec::new();
    let mut unexpected = Vec::new();

    for op in ops {
        let result = match op {
            Op::Register(u) => h.registrations.register(free.id, users[u]).await.map(drop),
            Op::Approve(u) => h
                .registrations
                .approve(free.id, users[u], free.organizer_id)
                .await
                .map(drop),
            Op::Reject(u) => h
                .registrations
                .reject(free.id, users[u], free.organizer_id)
                .await
                .map(drop),
            Op::Unregister(u) => h.registrations.unregister(free.id, users[u]).await.map(drop),
            Op::Checkout(u, quantity) => h
                .payments
                .initiate_purchase(
                    paid.id,
                    users[u],
                    quantity,
                    Money::from_minor(PRICE * u64::from(quantity)),
                )
                .await
                .map(|reference| references.push(reference)),
            Op::Settle(p, status) => match references.get(p) {
                Some(reference) => h
                    .payments
                    .apply_settlement(reference, status, None)
                    .await
                    .map(drop),
                None => Ok(()),
            },
        };
        if let Err(error) = result {
            if !error.is_expected() {
                unexpected.push(error.to_string());
            }
        }
    }

    let free_audit = h.audit.audit_event(free.id).await.unwrap();
    let paid_audit = h.audit.audit_event(paid.id).await.unwrap();

    Outcome {
        free_count: h.attendee_count(free.id),
        free_capacity: free.capacity,
        paid_count: h.attendee_count(paid.id),
        paid_capacity: paid.capacity,
        consistent: free_audit.is_consistent() && paid_audit.is_consistent(),
        unexpected,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The counter matches the seat-holding rows and never exceeds capacity
    #[test]
    fn counter_tracks_rows(
        capacity in prop::option::of(1..4u32),
        require_approval in any::<bool>(),
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let outcome = runtime.block_on(run(capacity, require_approval, ops));

        prop_assert!(outcome.unexpected.is_empty(), "unexpected errors: {:?}", outcome.unexpected);
        prop_assert!(outcome.consistent);
        if let Some(cap) = outcome.free_capacity {
            prop_assert!(outcome.free_count <= cap);
        }
        if let Some(cap) = outcome.paid_capacity {
            prop_assert!(outcome.paid_count <= cap);
        }
    }
}
