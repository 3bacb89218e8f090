//! Property tests for the motion, smoothing, identity and merge layers.

use fleetview_core::{
    normalize, segment_duration, EntityMap, MotionConfig, MotionInterpolator, PositionFilter,
};
use fleetview_env::LatLng;
use proptest::prelude::*;
use serde_json::json;

const ORIGIN: LatLng = LatLng::new(35.140876, 126.930593);

fn no_token() -> String {
    "unused".to_string()
}

proptest! {
    /// Property: the pending queue never exceeds its cap and always ends at
    /// the latest smoothed target.
    #[test]
    fn prop_queue_bounded_and_keeps_latest(
        steps in prop::collection::vec((0.0005f64..0.01, -0.01f64..0.01), 1..40),
    ) {
        let config = MotionConfig::default();
        let mut interpolator = MotionInterpolator::with_defaults();
        interpolator.observe("v", ORIGIN);

        let mut raw = ORIGIN;
        let mut last = None;
        for (dlat, dlng) in steps {
            raw = LatLng::new(raw.lat + dlat, raw.lng + dlng);
            last = Some(interpolator.observe("v", raw).smoothed);
        }

        let entry = interpolator.entry("v").unwrap();
        prop_assert!(entry.queue_len() <= config.max_queue_len);
        let tail = entry.queued().last().map(|s| s.target);
        prop_assert_eq!(tail, last);
    }

    /// Property: segment duration is monotone in distance and clamped.
    #[test]
    fn prop_duration_monotone_and_bounded(a in 0.0f64..50_000.0, b in 0.0f64..50_000.0) {
        let config = MotionConfig::default();
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        let d_near = segment_duration(near, &config);
        let d_far = segment_duration(far, &config);

        prop_assert!(d_near <= d_far);
        for d in [d_near, d_far] {
            prop_assert!(d >= config.min_duration() && d <= config.max_duration());
        }
    }

    /// Property: a constant signal is approached without overshoot.
    #[test]
    fn prop_smoothing_converges_without_overshoot(
        alpha in 0.05f64..1.0,
        start_lat in -0.05f64..0.05,
        start_lng in -0.05f64..0.05,
    ) {
        let target = ORIGIN;
        let mut filter = PositionFilter::new(alpha);
        filter.apply(LatLng::new(target.lat + start_lat, target.lng + start_lng));

        let mut prev = filter.value().unwrap();
        for _ in 0..200 {
            let next = filter.apply(target);
            prop_assert!((next.lat - target.lat).abs() <= (prev.lat - target.lat).abs());
            prop_assert!((next.lng - target.lng).abs() <= (prev.lng - target.lng).abs());
            // Never crosses the target
            prop_assert!((next.lat - target.lat) * (prev.lat - target.lat) >= 0.0);
            prop_assert!((next.lng - target.lng) * (prev.lng - target.lng) >= 0.0);
            prev = next;
        }
        prop_assert!((prev.lat - target.lat).abs() < 1e-5);
    }

    /// Property: transient fields never change a vehicle's id.
    #[test]
    fn prop_id_stable_across_transient_fields(
        speed in 0.0f64..120.0,
        updated_at in 1_600_000_000_000i64..1_900_000_000_000,
        dlat in -0.01f64..0.01,
        name in "[a-z ]{0,12}",
    ) {
        let base = json!({"busId": "BUS07", "lat": 35.14, "lng": 126.93, "org": "chosun"});
        let moved = json!({
            "busId": "BUS07",
            "lat": 35.14 + dlat,
            "lng": 126.93,
            "org": "chosun",
            "speed": speed,
            "updatedAt": updated_at,
            "name": name,
        });

        let a = normalize(&base, 0, no_token).unwrap();
        let b = normalize(&moved, 0, no_token).unwrap();
        prop_assert_eq!(a.id, b.id);
    }

    /// Property: merging the same batch twice equals merging it once.
    #[test]
    fn prop_merge_idempotent(
        positions in prop::collection::vec((-0.05f64..0.05, -0.05f64..0.05), 1..12),
    ) {
        let batch: Vec<_> = positions
            .iter()
            .enumerate()
            .map(|(i, (dlat, dlng))| json!({
                "busId": format!("BUS{:02}", i),
                "lat": ORIGIN.lat + dlat,
                "lng": ORIGIN.lng + dlng,
                "org": "jang",
                "updatedAt": 1_700_000_000_000i64,
            }))
            .collect();

        let mut once = EntityMap::new();
        once.merge_batch(&batch, 0, no_token, 2);

        let mut twice = EntityMap::new();
        twice.merge_batch(&batch, 0, no_token, 2);
        let report = twice.merge_batch(&batch, 0, no_token, 2);

        prop_assert!(report.redelivery);
        prop_assert!(report.created.is_empty() && report.pruned.is_empty());
        prop_assert_eq!(once.summaries(), twice.summaries());
    }
}
