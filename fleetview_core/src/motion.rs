//! The "MOTION" Engine - Segment-queued marker interpolation
//!
//! Each entity owns an [`AnimationEntry`]: its smoothing filter, its rendered
//! position, the active [`MotionSegment`] and a bounded FIFO of queued
//! segments. A single [`MotionInterpolator::tick`] advances every entry once
//! per display frame.
//!
//! Segment timing is distance-based (haversine at a reference speed) so a
//! marker moves at a roughly constant speed instead of a fixed duration.

use crate::config::{MotionConfig, SmoothingConfig};
use crate::smoothing::PositionFilter;
use fleetview_env::LatLng;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

// ============================================================================
// TIMING PRIMITIVES
// ============================================================================

/// Great-circle distance in meters.
pub fn haversine_m(a: LatLng, b: LatLng, earth_radius_m: f64) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * earth_radius_m * h.sqrt().min(1.0).asin()
}

/// Duration for a segment of `distance_m` meters.
///
/// `distance / reference_speed`, clamped to `[min, max]`. Zero, negative or
/// non-finite distances get the default duration.
pub fn segment_duration(distance_m: f64, config: &MotionConfig) -> Duration {
    if !distance_m.is_finite() || distance_m <= 0.0 {
        return config.default_duration();
    }
    let ms = distance_m / config.reference_speed_mps * 1000.0;
    let clamped = ms.clamp(config.min_duration_ms as f64, config.max_duration_ms as f64);
    Duration::from_secs_f64(clamped / 1000.0)
}

/// Quadratic ease-in-out on `[0, 1]`.
pub fn ease_in_out(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - 2.0 * (1.0 - t) * (1.0 - t)
    }
}

fn lerp(from: LatLng, to: LatLng, fraction: f64) -> LatLng {
    LatLng::new(
        from.lat + (to.lat - from.lat) * fraction,
        from.lng + (to.lng - from.lng) * fraction,
    )
}

// ============================================================================
// SEGMENTS
// ============================================================================

/// A segment waiting in an entity's queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedSegment {
    /// Where the segment was chained from when queued
    pub start: LatLng,
    pub target: LatLng,
    pub duration: Duration,
}

impl QueuedSegment {
    /// Start this segment from the marker's current rendered position.
    ///
    /// If older segments were dropped on overflow the rendered position no
    /// longer matches `start`; the segment is re-anchored and re-timed so the
    /// marker never jumps.
    fn begin(self, rendered: LatLng, now: Duration, config: &MotionConfig) -> MotionSegment {
        let duration = if rendered == self.start {
            self.duration
        } else {
            segment_duration(haversine_m(rendered, self.target, config.earth_radius_m), config)
        };
        MotionSegment {
            start: rendered,
            target: self.target,
            duration,
            started_at: now,
        }
    }
}

/// A started leg of motion. Immutable once started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSegment {
    pub start: LatLng,
    pub target: LatLng,
    pub duration: Duration,
    pub started_at: Duration,
}

impl MotionSegment {
    /// Linear progress in `[0, 1]` at `now`.
    pub fn progress(&self, now: Duration) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_sub(self.started_at);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }

    /// Eased position at `now`.
    pub fn position_at(&self, now: Duration) -> LatLng {
        lerp(self.start, self.target, ease_in_out(self.progress(now)))
    }
}

// ============================================================================
// ANIMATION ENTRY
// ============================================================================

/// Per-entity animation state.
#[derive(Debug, Clone)]
pub struct AnimationEntry {
    filter: PositionFilter,
    rendered: LatLng,
    active: Option<MotionSegment>,
    queue: VecDeque<QueuedSegment>,
}

impl AnimationEntry {
    fn new(first: LatLng, alpha: f64) -> Self {
        let mut filter = PositionFilter::new(alpha);
        let rendered = filter.apply(first);
        Self {
            filter,
            rendered,
            active: None,
            queue: VecDeque::new(),
        }
    }

    /// Where the marker is drawn right now.
    pub fn rendered(&self) -> LatLng {
        self.rendered
    }

    /// Latest smoothed target.
    pub fn smoothed(&self) -> LatLng {
        self.filter.value().unwrap_or(self.rendered)
    }

    pub fn active(&self) -> Option<&MotionSegment> {
        self.active.as_ref()
    }

    pub fn queued(&self) -> impl Iterator<Item = &QueuedSegment> {
        self.queue.iter()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether this entry has an active or queued segment.
    pub fn has_pending_work(&self) -> bool {
        self.active.is_some() || !self.queue.is_empty()
    }

    /// The position the next queued segment would chain from.
    fn tail(&self) -> LatLng {
        self.queue
            .back()
            .map(|segment| segment.target)
            .or_else(|| self.active.map(|segment| segment.target))
            .unwrap_or(self.rendered)
    }

    /// Queue a segment toward `target`. Returns false for sub-epsilon moves.
    fn enqueue(&mut self, target: LatLng, config: &MotionConfig) -> bool {
        let tail = self.tail();
        let eps = config.enqueue_epsilon_deg;
        if (target.lat - tail.lat).abs() <= eps && (target.lng - tail.lng).abs() <= eps {
            return false;
        }
        let distance = haversine_m(tail, target, config.earth_radius_m);
        self.queue.push_back(QueuedSegment {
            start: tail,
            target,
            duration: segment_duration(distance, config),
        });
        while self.queue.len() > config.max_queue_len {
            self.queue.pop_front();
        }
        true
    }

    /// Advance by one frame. Returns the new rendered position if it moved.
    fn step(&mut self, now: Duration, config: &MotionConfig) -> Option<LatLng> {
        if self.active.is_none() {
            let next = self.queue.pop_front()?;
            self.active = Some(next.begin(self.rendered, now, config));
        }
        let segment = self.active?;

        let t = segment.progress(now);
        let position = lerp(segment.start, segment.target, ease_in_out(t));
        self.rendered = position;

        if t >= 1.0 {
            self.active = self
                .queue
                .pop_front()
                .map(|next| next.begin(position, now, config));
        }
        Some(position)
    }
}

// ============================================================================
// INTERPOLATOR
// ============================================================================

/// Result of feeding one telemetry position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Smoothed target after this sample
    pub smoothed: LatLng,
    /// The entry was created by this sample (marker starts here, no motion)
    pub created: bool,
    /// A segment was queued
    pub queued: bool,
}

/// One entity's rendered position after a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameUpdate {
    pub id: String,
    pub position: LatLng,
}

/// Owner of all animation entries and the shared frame step.
#[derive(Debug, Clone)]
pub struct MotionInterpolator {
    config: MotionConfig,
    alpha: f64,
    entries: BTreeMap<String, AnimationEntry>,
}

impl MotionInterpolator {
    pub fn new(motion: MotionConfig, smoothing: &SmoothingConfig) -> Self {
        Self {
            config: motion,
            alpha: smoothing.alpha,
            entries: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MotionConfig::default(), &SmoothingConfig::default())
    }

    /// Smooth a raw telemetry position and queue motion toward it.
    pub fn observe(&mut self, id: &str, raw: LatLng) -> Observation {
        match self.entries.get_mut(id) {
            Some(entry) => {
                let smoothed = entry.filter.apply(raw);
                let queued = entry.enqueue(smoothed, &self.config);
                Observation {
                    smoothed,
                    created: false,
                    queued,
                }
            }
            None => {
                let entry = AnimationEntry::new(raw, self.alpha);
                let smoothed = entry.rendered;
                self.entries.insert(id.to_string(), entry);
                Observation {
                    smoothed,
                    created: true,
                    queued: false,
                }
            }
        }
    }

    /// Advance every entry with pending motion by one frame.
    pub fn tick(&mut self, now: Duration) -> Vec<FrameUpdate> {
        let config = &self.config;
        self.entries
            .iter_mut()
            .filter_map(|(id, entry)| {
                entry.step(now, config).map(|position| FrameUpdate {
                    id: id.clone(),
                    position,
                })
            })
            .collect()
    }

    /// Whether any entity has an active or queued segment.
    pub fn has_pending_work(&self) -> bool {
        self.entries.values().any(AnimationEntry::has_pending_work)
    }

    pub fn entry(&self, id: &str) -> Option<&AnimationEntry> {
        self.entries.get(id)
    }

    pub fn rendered_position(&self, id: &str) -> Option<LatLng> {
        self.entries.get(id).map(AnimationEntry::rendered)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Discard an entity's entry (queued segments included).
    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude ≈ 111.19 km on a 6,371 km sphere
        let d = haversine_m(LatLng::new(35.0, 126.0), LatLng::new(36.0, 126.0), 6_371_000.0);
        assert_relative_eq!(d, 111_194.9, epsilon = 1.0);
    }

    #[test]
    fn test_segment_duration_clamps() {
        let config = MotionConfig::default();
        assert_eq!(segment_duration(0.0, &config), ms(350));
        assert_eq!(segment_duration(f64::NAN, &config), ms(350));
        assert_eq!(segment_duration(1.0, &config), ms(320));
        assert_eq!(segment_duration(100_000.0, &config), ms(2200));

        // 13.8 m at 13.8 m/s is one second
        let d = segment_duration(13.8, &config);
        assert_relative_eq!(d.as_secs_f64(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ease_curve() {
        assert_eq!(ease_in_out(0.0), 0.0);
        assert_eq!(ease_in_out(1.0), 1.0);
        assert_relative_eq!(ease_in_out(0.5), 0.5, epsilon = 1e-12);
        assert_relative_eq!(ease_in_out(0.25), 0.125, epsilon = 1e-12);
        assert_relative_eq!(ease_in_out(0.75), 0.875, epsilon = 1e-12);
    }

    #[test]
    fn test_first_observation_creates_without_motion() {
        let mut interp = MotionInterpolator::with_defaults();
        let obs = interp.observe("a", LatLng::new(35.0, 126.0));
        assert!(obs.created);
        assert!(!obs.queued);
        assert!(!interp.has_pending_work());
        assert_eq!(interp.rendered_position("a"), Some(LatLng::new(35.0, 126.0)));
    }

    #[test]
    fn test_second_observation_queues_smoothed_target() {
        let mut interp = MotionInterpolator::with_defaults();
        interp.observe("a", LatLng::new(35.0, 126.0));
        let obs = interp.observe("a", LatLng::new(35.001, 126.0));
        assert!(obs.queued);
        assert_relative_eq!(obs.smoothed.lat, 35.00035, epsilon = 1e-9);

        let entry = interp.entry("a").unwrap();
        assert_eq!(entry.queue_len(), 1);
        assert_eq!(entry.queued().next().unwrap().target, obs.smoothed);
    }

    #[test]
    fn test_sub_epsilon_move_not_queued() {
        let mut interp = MotionInterpolator::with_defaults();
        interp.observe("a", LatLng::new(35.0, 126.0));
        let obs = interp.observe("a", LatLng::new(35.000_000_5, 126.0));
        assert!(!obs.queued);
        assert!(!interp.has_pending_work());
    }

    #[test]
    fn test_queue_bound_keeps_latest_target() {
        let mut interp = MotionInterpolator::with_defaults();
        interp.observe("a", LatLng::new(35.0, 126.0));
        let mut last = None;
        for i in 1..=12 {
            let obs = interp.observe("a", LatLng::new(35.0 + i as f64 * 0.001, 126.0));
            last = Some(obs.smoothed);
        }
        let entry = interp.entry("a").unwrap();
        assert_eq!(entry.queue_len(), 5);
        assert_eq!(entry.queued().last().unwrap().target, last.unwrap());
    }

    #[test]
    fn test_tick_animates_to_target_and_retires() {
        let mut interp = MotionInterpolator::with_defaults();
        interp.observe("a", LatLng::new(35.0, 126.0));
        let target = interp.observe("a", LatLng::new(35.01, 126.0)).smoothed;

        let start = ms(1_000);
        let first = interp.tick(start);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].position, LatLng::new(35.0, 126.0));

        let duration = interp.entry("a").unwrap().active().unwrap().duration;

        let mid = interp.tick(start + duration / 2);
        assert!(mid[0].position.lat > 35.0 && mid[0].position.lat < target.lat);

        let end = interp.tick(start + duration);
        assert_eq!(end[0].position, target);
        assert!(!interp.has_pending_work());
        assert!(interp.tick(start + duration * 2).is_empty());
    }

    #[test]
    fn test_next_segment_starts_at_completion_time() {
        let mut interp = MotionInterpolator::with_defaults();
        interp.observe("a", LatLng::new(35.0, 126.0));
        interp.observe("a", LatLng::new(35.01, 126.0));
        interp.observe("a", LatLng::new(35.02, 126.0));

        interp.tick(ms(0));
        let first = *interp.entry("a").unwrap().active().unwrap();
        let done_at = first.duration + ms(5);
        interp.tick(done_at);

        let second = *interp.entry("a").unwrap().active().unwrap();
        assert_eq!(second.started_at, done_at);
        assert_eq!(second.start, first.target);
    }

    #[test]
    fn test_overflow_reanchors_without_jump() {
        let mut interp = MotionInterpolator::with_defaults();
        interp.observe("a", LatLng::new(35.0, 126.0));
        for i in 1..=8 {
            interp.observe("a", LatLng::new(35.0 + i as f64 * 0.001, 126.0));
        }
        interp.tick(ms(0));
        let active = interp.entry("a").unwrap().active().unwrap();
        assert_eq!(active.start, LatLng::new(35.0, 126.0));
    }

    #[test]
    fn test_remove_discards_entry() {
        let mut interp = MotionInterpolator::with_defaults();
        interp.observe("a", LatLng::new(35.0, 126.0));
        interp.observe("a", LatLng::new(35.1, 126.0));
        assert!(interp.remove("a"));
        assert!(!interp.remove("a"));
        assert!(!interp.has_pending_work());
    }
}
