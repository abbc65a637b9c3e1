//! Property tests for handle accounting.

use faultbench::config::HarnessConfig;
use faultbench::costmodel::{Growth, build_items};
use faultbench::harness::Harness;
use faultbench::policy::{Policy, PolicyKind, PolicyOptions};
use faultbench::resource::ReleaseOutcome;
use faultbench_trace::IntrospectionRegistry;
use proptest::prelude::*;
use std::sync::Arc;

fn arb_policy() -> impl Strategy<Value = PolicyKind> {
    prop_oneof![Just(PolicyKind::Leaking), Just(PolicyKind::Correct)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_final_counts_follow_policy(
        policy in arb_policy(),
        total_ops in 1u64..200,
        concurrency in 1usize..6,
    ) {
        let harness = Harness::new();
        harness.start(policy, HarnessConfig::new(0, total_ops, concurrency)).unwrap();
        harness.stop().unwrap();
        let snap = harness.report();

        prop_assert!(snap.is_consistent());
        prop_assert_eq!(snap.cumulative_acquired, total_ops);
        match policy {
            PolicyKind::Leaking => {
                prop_assert_eq!(snap.active_handles, total_ops);
                prop_assert_eq!(snap.cumulative_released, 0);
            }
            PolicyKind::Correct => {
                prop_assert_eq!(snap.active_handles, 0);
                prop_assert_eq!(snap.cumulative_released, total_ops);
            }
        }
    }

    #[test]
    fn prop_release_is_idempotent(extra_releases in 1usize..5, handles in 1usize..20) {
        let registry = Arc::new(IntrospectionRegistry::new());
        let policy = Policy::new(PolicyKind::Correct, Arc::clone(&registry), PolicyOptions::default());

        let mut acquired: Vec<_> = (0..handles).map(|_| policy.acquire().unwrap()).collect();
        for handle in &mut acquired {
            prop_assert_eq!(policy.release(handle).unwrap(), ReleaseOutcome::Released);
            for _ in 0..extra_releases {
                prop_assert_eq!(policy.release(handle).unwrap(), ReleaseOutcome::AlreadyReleased);
            }
        }

        let snap = registry.snapshot();
        prop_assert_eq!(snap.active_handles, 0);
        prop_assert_eq!(snap.cumulative_released, handles as u64);
    }

    #[test]
    fn prop_ceiling_is_never_exceeded(ceiling in 1u64..50, attempts in 1u64..100) {
        let registry = Arc::new(IntrospectionRegistry::new());
        let options = PolicyOptions { ceiling: Some(ceiling), handle_capacity: 0 };
        let policy = Policy::new(PolicyKind::Leaking, Arc::clone(&registry), options);

        let mut held = Vec::new();
        for _ in 0..attempts {
            match policy.acquire() {
                Ok(handle) => held.push(handle),
                Err(_) => prop_assert_eq!(held.len() as u64, ceiling),
            }
        }
        prop_assert_eq!(registry.snapshot().active_handles, attempts.min(ceiling));
    }

    #[test]
    fn prop_growth_strategies_agree(n in 0usize..500) {
        let naive = build_items(n, Growth::Naive);
        let amortized = build_items(n, Growth::Amortized);
        prop_assert_eq!(naive.as_str(), amortized.as_str());
        prop_assert!(naive.meter().bytes_copied >= amortized.meter().bytes_copied);
    }
}
