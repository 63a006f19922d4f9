// Property-based tests for the invariants called out in §8 of the
// specification: idempotency key stability under normalization, and the
// error budget's boundary behaviours.

use progressive_delivery::domain::{BudgetStatus, ErrorBudget};
use progressive_delivery::idempotency::derive_key;
use proptest::prelude::*;
use serde_json::json;

proptest! {
    /// Key stability: reordering object keys never changes the derived key.
    #[test]
    fn key_is_stable_under_field_reordering(a in 0i64..1000, b in 0i64..1000, c in "[a-z]{1,8}") {
        let first = json!({ "amount": a, "count": b, "donor": c.clone() });
        let second = json!({ "donor": c, "count": b, "amount": a });
        prop_assert_eq!(derive_key("benevity", &first), derive_key("benevity", &second));
    }

    /// Key stability: a present-but-null field never changes the derived key.
    #[test]
    fn key_is_stable_under_null_field_presence(amount in 0i64..1000) {
        let without_null = json!({ "amount": amount });
        let with_null = json!({ "amount": amount, "note": serde_json::Value::Null });
        prop_assert_eq!(derive_key("benevity", &without_null), derive_key("benevity", &with_null));
    }

    /// Distinct scalar payloads hash differently (no accidental collision
    /// from the canonicalization step itself).
    #[test]
    fn distinct_amounts_hash_differently(a in 0i64..100000, b in 0i64..100000) {
        prop_assume!(a != b);
        let pa = json!({ "amount": a });
        let pb = json!({ "amount": b });
        prop_assert_ne!(derive_key("benevity", &pa), derive_key("benevity", &pb));
    }

    /// Every derived key is a 64-character lowercase hex string (SHA-256,
    /// hex-encoded), regardless of payload shape.
    #[test]
    fn key_is_always_hex_sha256(amount in 0i64..1000, label in "[a-z]{0,12}") {
        let key = derive_key("benevity", &json!({ "amount": amount, "label": label }));
        prop_assert_eq!(key.len(), 64);
        prop_assert!(key.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
    }

    /// The partner is folded into the pre-image, so the same payload sent
    /// through two distinct partners never collides on one cache key.
    #[test]
    fn distinct_partners_hash_differently(amount in 0i64..1000) {
        let payload = json!({ "amount": amount });
        prop_assert_ne!(derive_key("benevity", &payload), derive_key("workday", &payload));
    }

    /// Zero-request-window boundary: regardless of SLO or thresholds, 100%
    /// observed availability never consumes budget and is always healthy.
    #[test]
    fn full_availability_is_always_healthy(
        slo in 90.0f64..99.999,
        warning in 0.5f64..10.0,
        critical in 10.0f64..50.0,
    ) {
        let budget = ErrorBudget::compute(100.0, slo, warning, critical);
        prop_assert_eq!(budget.consumed_pct, 0.0);
        prop_assert_eq!(budget.burn_rate, 0.0);
        prop_assert_eq!(budget.status, BudgetStatus::Healthy);
    }

    /// Remaining budget is never negative, and a fully consumed budget is
    /// always `Exhausted` regardless of how low the burn rate looks.
    #[test]
    fn remaining_budget_never_goes_negative(
        availability in 0.0f64..100.0,
        slo in 90.0f64..99.999,
        warning in 0.5f64..10.0,
        critical in 10.0f64..50.0,
    ) {
        let budget = ErrorBudget::compute(availability, slo, warning, critical);
        prop_assert!(budget.remaining_pct >= 0.0);
        if budget.remaining_pct == 0.0 {
            prop_assert_eq!(budget.status, BudgetStatus::Exhausted);
        }
    }

    /// Burn rate is monotonic in consumed percent for a fixed SLO: more
    /// unavailability never produces a lower burn rate.
    #[test]
    fn burn_rate_is_monotonic_in_unavailability(
        slo in 90.0f64..99.9,
        lo in 0.0f64..50.0,
        delta in 0.0f64..50.0,
    ) {
        let hi = (lo + delta).min(100.0);
        let budget_lo = ErrorBudget::compute(100.0 - lo, slo, 1.0, 2.0);
        let budget_hi = ErrorBudget::compute(100.0 - hi, slo, 1.0, 2.0);
        prop_assert!(budget_hi.burn_rate >= budget_lo.burn_rate - 1e-9);
    }
}
