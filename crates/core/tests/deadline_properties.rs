//! Property tests for the deadline arithmetic.

use chrono::{Duration, TimeZone, Utc};
use photochanger_core::deadlines::{
    artifact_expiry, deadline_info, job_expires_at, result_expires_at,
};
use photochanger_core::types::Timestamp;
use proptest::prelude::*;

fn instant(offset_secs: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_secs)
}

proptest! {
    #[test]
    fn expires_at_is_created_plus_budget(offset in 0i64..10_000_000, sync in 1u32..600) {
        let created = instant(offset);
        let expires = job_expires_at(created, sync, sync).unwrap();
        prop_assert_eq!(expires, created + Duration::seconds(i64::from(sync)));
    }

    #[test]
    fn mismatched_ttl_always_fails(sync in 1u32..600, link in 1u32..600) {
        prop_assume!(sync != link);
        prop_assert!(job_expires_at(instant(0), sync, link).is_err());
    }

    #[test]
    fn artifacts_never_outlive_their_job(
        created in 0i64..1_000_000,
        job_window in 0i64..1_000_000,
        ttl in 0u32..1_000_000,
    ) {
        let job_expires = instant(created + job_window);
        let expiry = artifact_expiry(instant(created), job_expires, ttl);
        prop_assert!(expiry <= job_expires);
        prop_assert!(expiry <= instant(created) + Duration::seconds(i64::from(ttl)));
    }

    #[test]
    fn remaining_is_never_negative(expires in 0i64..100_000, now in 0i64..100_000) {
        let info = deadline_info(instant(expires), instant(now));
        prop_assert!(info.remaining_ms >= 0);
        prop_assert_eq!(info.is_expired, now >= expires);
    }

    #[test]
    fn result_expiry_follows_retention(offset in 0i64..10_000_000, hours in 1i64..10_000) {
        let finalized = instant(offset);
        let expires = result_expires_at(finalized, hours).unwrap();
        prop_assert_eq!(expires - finalized, Duration::hours(hours));
    }
}
