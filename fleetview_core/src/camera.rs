//! The "CAMERA" Engine - Follow state machine
//!
//! Decides what the map camera does after each telemetry batch, selection
//! change or explicit reset:
//!
//! - `FollowingEntity`: center once on the selected operator's vehicle, then
//!   pan after it frame by frame (throttled).
//! - `FollowingGroup`: center on a lone vehicle or fit bounds around all
//!   vehicles of the selected organization.
//! - `ManualOverride`: the user is driving; telemetry never moves the camera.
//!
//! Every camera call the controller makes opens a settle window during which
//! drag/zoom events are treated as echoes of its own move.

use crate::config::CameraConfig;
use crate::visibility::Selection;
use fleetview_env::{EnvError, LatLng, MapEvent, MapWidget};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// STATE
// ============================================================================

/// Who started a manual override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverrideSource {
    /// Drag or zoom on the map itself; a selection change ends it
    Gesture,
    /// Declared by an external caller; only expiry or reset ends it
    External,
}

/// End of a manual override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverrideUntil {
    At(Duration),
    Indefinite,
}

impl OverrideUntil {
    fn from_duration(now: Duration, duration: Option<Duration>) -> Self {
        match duration {
            Some(d) => OverrideUntil::At(now + d),
            None => OverrideUntil::Indefinite,
        }
    }

    /// Strictly after `until`.
    pub fn has_expired(&self, now: Duration) -> bool {
        match self {
            OverrideUntil::At(until) => now > *until,
            OverrideUntil::Indefinite => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CameraMode {
    Idle,
    FollowingEntity {
        target_id: String,
    },
    FollowingGroup {
        org_key: Option<String>,
    },
    ManualOverride {
        reason: String,
        source: OverrideSource,
        until: OverrideUntil,
    },
}

impl CameraMode {
    pub fn name(&self) -> &'static str {
        match self {
            CameraMode::Idle => "idle",
            CameraMode::FollowingEntity { .. } => "following_entity",
            CameraMode::FollowingGroup { .. } => "following_group",
            CameraMode::ManualOverride { .. } => "manual_override",
        }
    }
}

/// Snapshot of the follow bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraFollowState {
    pub target_id: Option<String>,
    pub last_followed_position: Option<LatLng>,
    pub last_pan_at: Option<Duration>,
    pub manual_override_until: Option<OverrideUntil>,
    pub override_reason: Option<String>,
}

/// A live entity as the controller sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPosition {
    pub id: String,
    pub org_key: String,
    pub operator_id: Option<i64>,
    /// Rendered position if animated, else the entity's reported position
    pub position: LatLng,
}

/// What a decision pass did.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraAction {
    /// A manual override is active
    Suppressed,
    /// Already following the selected entity
    Unchanged,
    /// Started following an entity (instant center)
    Locked { target_id: String },
    /// The selected operator has no live vehicle
    Unfollowed,
    /// Centered on the only vehicle of the group
    CenteredGroup { position: LatLng },
    /// Fitted bounds around `count` vehicles
    FittedGroup { count: usize },
    /// No vehicles; centered on self location or the default coordinate
    Fallback { position: LatLng },
}

// ============================================================================
// CONTROLLER
// ============================================================================

#[derive(Debug, Clone)]
pub struct CameraFollowController {
    config: CameraConfig,
    mode: CameraMode,
    last_followed: Option<LatLng>,
    last_pan_at: Option<Duration>,
    programmatic_until: Option<Duration>,
    self_location: Option<LatLng>,
}

impl CameraFollowController {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            mode: CameraMode::Idle,
            last_followed: None,
            last_pan_at: None,
            programmatic_until: None,
            self_location: None,
        }
    }

    pub fn mode(&self) -> &CameraMode {
        &self.mode
    }

    pub fn target_id(&self) -> Option<&str> {
        match &self.mode {
            CameraMode::FollowingEntity { target_id } => Some(target_id),
            _ => None,
        }
    }

    pub fn state(&self) -> CameraFollowState {
        let (until, reason) = match &self.mode {
            CameraMode::ManualOverride { reason, until, .. } => (Some(*until), Some(reason.clone())),
            _ => (None, None),
        };
        CameraFollowState {
            target_id: self.target_id().map(str::to_string),
            last_followed_position: self.last_followed,
            last_pan_at: self.last_pan_at,
            manual_override_until: until,
            override_reason: reason,
        }
    }

    pub fn self_location(&self) -> Option<LatLng> {
        self.self_location
    }

    pub fn set_self_location(&mut self, position: Option<LatLng>) {
        self.self_location = position.filter(LatLng::is_finite);
    }

    /// Whether drag/zoom events are currently echoes of our own moves.
    pub fn is_programmatic(&self, now: Duration) -> bool {
        self.programmatic_until.map_or(false, |until| now < until)
    }

    /// Whether a manual override is in force at `now`.
    pub fn is_manual(&self, now: Duration) -> bool {
        matches!(&self.mode, CameraMode::ManualOverride { until, .. } if !until.has_expired(now))
    }

    fn clear_follow(&mut self) {
        self.last_followed = None;
        self.last_pan_at = None;
    }

    fn transition(&mut self, next: CameraMode) {
        if self.mode != next {
            debug!(from = self.mode.name(), to = next.name(), "camera transition");
        }
        self.mode = next;
    }

    /// Enter manual override. `duration: None` means indefinite.
    pub fn register_manual_override(
        &mut self,
        reason: impl Into<String>,
        source: OverrideSource,
        duration: Option<Duration>,
        now: Duration,
    ) {
        let reason = reason.into();
        let reason = if reason.trim().is_empty() {
            "manual".to_string()
        } else {
            reason
        };
        self.clear_follow();
        self.transition(CameraMode::ManualOverride {
            reason,
            source,
            until: OverrideUntil::from_duration(now, duration),
        });
    }

    /// Map listener entry point. Returns true if the event started an override.
    pub fn handle_map_event(&mut self, event: MapEvent, now: Duration) -> bool {
        if self.is_programmatic(now) {
            return false;
        }
        let reason = match event {
            MapEvent::DragStart => "map-drag",
            MapEvent::ZoomChanged => "map-zoom",
        };
        self.register_manual_override(reason, OverrideSource::Gesture, None, now);
        true
    }

    /// The organization/operator selection changed.
    ///
    /// Ends a gesture override; an external override stays in force.
    pub fn on_selection_change(&mut self) {
        if let CameraMode::ManualOverride {
            source: OverrideSource::External,
            ..
        } = self.mode
        {
            return;
        }
        self.clear_follow();
        self.transition(CameraMode::Idle);
    }

    /// Explicit external reset: ends any override, including indefinite ones.
    pub fn reset(&mut self) {
        self.clear_follow();
        self.transition(CameraMode::Idle);
    }

    /// Back to `Idle` with no follow or settle state. Self location is kept.
    pub fn teardown(&mut self) {
        self.clear_follow();
        self.programmatic_until = None;
        self.transition(CameraMode::Idle);
    }

    fn expire_override(&mut self, now: Duration) {
        if let CameraMode::ManualOverride { until, reason, .. } = &self.mode {
            if until.has_expired(now) {
                debug!(reason = %reason, "manual override expired");
                self.transition(CameraMode::Idle);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Programmatic camera calls
    // ------------------------------------------------------------------------

    fn programmatic<W, F>(&mut self, widget: &mut W, now: Duration, settle_ms: u64, call: F) -> Result<(), EnvError>
    where
        W: MapWidget + ?Sized,
        F: FnOnce(&mut W) -> Result<(), EnvError>,
    {
        // An open window is not extended, so gestures still register
        // between back-to-back follow pans.
        if !self.is_programmatic(now) {
            self.programmatic_until = Some(now + Duration::from_millis(settle_ms));
        }
        let result = call(widget);
        if let Err(e) = &result {
            warn!(error = %e, "programmatic camera move failed");
        }
        result
    }

    fn center<W: MapWidget + ?Sized>(&mut self, widget: &mut W, position: LatLng, now: Duration) -> bool {
        let settle = self.config.settle.center_ms;
        self.programmatic(widget, now, settle, |w| w.set_center(position)).is_ok()
    }

    /// Set the zoom level as a programmatic move.
    pub fn set_level<W: MapWidget + ?Sized>(&mut self, widget: &mut W, level: u8, now: Duration) -> bool {
        let settle = self.config.settle.level_ms;
        self.programmatic(widget, now, settle, |w| w.set_level(level)).is_ok()
    }

    // ------------------------------------------------------------------------
    // Decision pass
    // ------------------------------------------------------------------------

    /// Run one decision pass.
    ///
    /// # Arguments
    /// * `selection` - Current organization/operator selection
    /// * `tracked` - All live entities in first-seen order, with their
    ///   current rendered positions
    pub fn decide<W: MapWidget + ?Sized>(
        &mut self,
        widget: &mut W,
        now: Duration,
        selection: &Selection,
        tracked: &[TrackedPosition],
    ) -> CameraAction {
        self.expire_override(now);
        if self.is_manual(now) {
            return CameraAction::Suppressed;
        }

        match selection.operator_id {
            Some(operator_id) => self.decide_entity(widget, now, selection, operator_id, tracked),
            None => self.decide_group(widget, now, selection, tracked),
        }
    }

    fn decide_entity<W: MapWidget + ?Sized>(
        &mut self,
        widget: &mut W,
        now: Duration,
        selection: &Selection,
        operator_id: i64,
        tracked: &[TrackedPosition],
    ) -> CameraAction {
        let target = tracked.iter().find(|t| {
            selection.org_key.as_deref().map_or(true, |key| t.org_key == key)
                && t.operator_id == Some(operator_id)
        });

        let Some(target) = target else {
            self.clear_follow();
            self.transition(CameraMode::Idle);
            return CameraAction::Unfollowed;
        };

        if self.target_id() == Some(target.id.as_str()) {
            return CameraAction::Unchanged;
        }

        self.clear_follow();
        self.transition(CameraMode::FollowingEntity {
            target_id: target.id.clone(),
        });
        if self.center(widget, target.position, now) {
            self.last_followed = Some(target.position);
            self.last_pan_at = Some(now);
        }
        CameraAction::Locked {
            target_id: target.id.clone(),
        }
    }

    fn decide_group<W: MapWidget + ?Sized>(
        &mut self,
        widget: &mut W,
        now: Duration,
        selection: &Selection,
        tracked: &[TrackedPosition],
    ) -> CameraAction {
        self.clear_follow();
        self.transition(CameraMode::FollowingGroup {
            org_key: selection.org_key.clone(),
        });

        let positions: Vec<LatLng> = tracked
            .iter()
            .filter(|t| selection.org_key.as_deref().map_or(true, |key| t.org_key == key))
            .map(|t| t.position)
            .filter(LatLng::is_finite)
            .collect();

        match positions.as_slice() {
            [] => {
                let position = self.self_location.unwrap_or(self.config.default_center);
                self.center(widget, position, now);
                CameraAction::Fallback { position }
            }
            [only] => {
                self.center(widget, *only, now);
                CameraAction::CenteredGroup { position: *only }
            }
            many => {
                let padding = self.config.bounds_padding_px;
                let settle = self.config.settle.bounds_ms;
                let _ = self.programmatic(widget, now, settle, |w| w.set_bounds(many, padding));
                CameraAction::FittedGroup { count: many.len() }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Per-frame follow
    // ------------------------------------------------------------------------

    /// Rendered-position callback from the interpolator.
    ///
    /// Returns true if the camera moved.
    pub fn on_position<W: MapWidget + ?Sized>(
        &mut self,
        widget: &mut W,
        id: &str,
        position: LatLng,
        now: Duration,
    ) -> bool {
        if !position.is_finite() || self.target_id() != Some(id) {
            return false;
        }
        self.expire_override(now);
        if self.is_manual(now) {
            return false;
        }

        let Some(previous) = self.last_followed else {
            if self.center(widget, position, now) {
                self.last_followed = Some(position);
                self.last_pan_at = Some(now);
                return true;
            }
            return false;
        };

        let eps = self.config.follow_epsilon_deg;
        if (position.lat - previous.lat).abs() < eps && (position.lng - previous.lng).abs() < eps {
            return false;
        }
        if let Some(last) = self.last_pan_at {
            if now.saturating_sub(last) < self.config.pan_interval() {
                return false;
            }
        }

        let settle = self.config.settle.pan_ms;
        if self.programmatic(widget, now, settle, |w| w.pan_to(position)).is_err() {
            return false;
        }
        self.last_followed = Some(position);
        self.last_pan_at = Some(now);
        true
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CameraCall, TestMap};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn tracked(id: &str, org: &str, op: Option<i64>, lat: f64) -> TrackedPosition {
        TrackedPosition {
            id: id.to_string(),
            org_key: org.to_string(),
            operator_id: op,
            position: LatLng::new(lat, 126.9),
        }
    }

    fn controller() -> CameraFollowController {
        CameraFollowController::new(CameraConfig::default())
    }

    #[test]
    fn test_follow_selects_matching_operator_only() {
        let mut cam = controller();
        let mut map = TestMap::default();
        let live = vec![
            tracked("jang:a", "jang", Some(0), 35.1),
            tracked("jang:b", "jang", Some(1), 35.2),
        ];
        let selection = Selection::org("jang").with_operator(1);

        let action = cam.decide(&mut map, ms(0), &selection, &live);
        assert_eq!(action, CameraAction::Locked { target_id: "jang:b".into() });
        assert_eq!(cam.target_id(), Some("jang:b"));
        assert_eq!(map.camera, vec![CameraCall::Center(LatLng::new(35.2, 126.9))]);

        // Same target on the next batch: no recenter
        let action = cam.decide(&mut map, ms(1000), &selection, &live);
        assert_eq!(action, CameraAction::Unchanged);
        assert_eq!(map.camera.len(), 1);

        // Only the target's positions move the camera
        assert!(!cam.on_position(&mut map, "jang:a", LatLng::new(35.5, 126.9), ms(2000)));
        assert!(cam.on_position(&mut map, "jang:b", LatLng::new(35.3, 126.9), ms(2000)));
    }

    #[test]
    fn test_target_disappearing_unfollows_without_recenter() {
        let mut cam = controller();
        let mut map = TestMap::default();
        let selection = Selection::org("jang").with_operator(1);
        cam.decide(&mut map, ms(0), &selection, &[tracked("jang:b", "jang", Some(1), 35.2)]);

        let action = cam.decide(&mut map, ms(500), &selection, &[tracked("jang:a", "jang", Some(0), 35.1)]);
        assert_eq!(action, CameraAction::Unfollowed);
        assert_eq!(cam.mode(), &CameraMode::Idle);
        assert_eq!(map.camera.len(), 1);
    }

    #[test]
    fn test_pan_throttle_and_epsilon() {
        let mut cam = controller();
        let mut map = TestMap::default();
        let selection = Selection::all().with_operator(7);
        cam.decide(&mut map, ms(0), &selection, &[tracked("x:1", "x", Some(7), 35.0)]);

        // Inside the interval
        assert!(!cam.on_position(&mut map, "x:1", LatLng::new(35.001, 126.9), ms(100)));
        // Past the interval
        assert!(cam.on_position(&mut map, "x:1", LatLng::new(35.001, 126.9), ms(150)));
        // Sub-epsilon move
        assert!(!cam.on_position(&mut map, "x:1", LatLng::new(35.00101, 126.9), ms(400)));
        // Past the interval again
        assert!(cam.on_position(&mut map, "x:1", LatLng::new(35.002, 126.9), ms(450)));

        let pans = map.camera.iter().filter(|c| matches!(c, CameraCall::Pan(_))).count();
        assert_eq!(pans, 2);
    }

    #[test]
    fn test_open_settle_window_is_not_extended() {
        let mut cam = controller();
        let mut map = TestMap::default();
        let selection = Selection::all().with_operator(7);
        cam.decide(&mut map, ms(0), &selection, &[tracked("x:1", "x", Some(7), 35.0)]);
        assert!(cam.is_programmatic(ms(200)));

        // Pan inside the center window leaves it closing at 220 ms
        assert!(cam.on_position(&mut map, "x:1", LatLng::new(35.001, 126.9), ms(150)));
        assert!(!cam.is_programmatic(ms(230)));
        assert!(cam.handle_map_event(MapEvent::ZoomChanged, ms(230)));
    }

    #[test]
    fn test_group_fit_modes() {
        let mut cam = controller();
        let mut map = TestMap::default();
        let live = vec![
            tracked("chosun:a", "chosun", None, 35.1),
            tracked("jang:b", "jang", None, 35.2),
            tracked("chosun:c", "chosun", None, 35.3),
        ];

        let action = cam.decide(&mut map, ms(0), &Selection::org("chosun"), &live);
        assert_eq!(action, CameraAction::FittedGroup { count: 2 });

        let action = cam.decide(&mut map, ms(0), &Selection::org("jang"), &live);
        assert_eq!(action, CameraAction::CenteredGroup { position: LatLng::new(35.2, 126.9) });

        let action = cam.decide(&mut map, ms(0), &Selection::all(), &live);
        assert_eq!(action, CameraAction::FittedGroup { count: 3 });
        assert_eq!(cam.mode(), &CameraMode::FollowingGroup { org_key: None });
    }

    #[test]
    fn test_empty_group_falls_back() {
        let mut cam = controller();
        let mut map = TestMap::default();

        let action = cam.decide(&mut map, ms(0), &Selection::org("chosun"), &[]);
        assert_eq!(action, CameraAction::Fallback { position: LatLng::new(35.140876, 126.930593) });

        cam.set_self_location(Some(LatLng::new(35.0, 127.0)));
        let action = cam.decide(&mut map, ms(0), &Selection::org("chosun"), &[]);
        assert_eq!(action, CameraAction::Fallback { position: LatLng::new(35.0, 127.0) });
    }

    #[test]
    fn test_finite_override_expires() {
        let mut cam = controller();
        let mut map = TestMap::default();
        let live = vec![tracked("jang:a", "jang", None, 35.1)];

        cam.register_manual_override("pinch", OverrideSource::External, Some(ms(3000)), ms(1000));
        assert_eq!(cam.decide(&mut map, ms(2000), &Selection::all(), &live), CameraAction::Suppressed);
        assert_eq!(cam.decide(&mut map, ms(4000), &Selection::all(), &live), CameraAction::Suppressed);
        assert!(map.camera.is_empty());

        let action = cam.decide(&mut map, ms(4001), &Selection::all(), &live);
        assert!(matches!(action, CameraAction::CenteredGroup { .. }));
    }

    #[test]
    fn test_indefinite_override_needs_reset() {
        let mut cam = controller();
        let mut map = TestMap::default();
        cam.register_manual_override("", OverrideSource::External, None, ms(0));
        assert_eq!(cam.state().override_reason.as_deref(), Some("manual"));

        let far = Duration::from_secs(60 * 60 * 24);
        assert_eq!(cam.decide(&mut map, far, &Selection::all(), &[]), CameraAction::Suppressed);

        cam.on_selection_change();
        assert!(cam.is_manual(far));

        cam.reset();
        assert!(!cam.is_manual(far));
        assert!(matches!(cam.decide(&mut map, far, &Selection::all(), &[]), CameraAction::Fallback { .. }));
    }

    #[test]
    fn test_selection_change_ends_gesture_override() {
        let mut cam = controller();
        assert!(cam.handle_map_event(MapEvent::DragStart, ms(0)));
        assert!(cam.is_manual(ms(10)));
        cam.on_selection_change();
        assert_eq!(cam.mode(), &CameraMode::Idle);
    }

    #[test]
    fn test_programmatic_moves_do_not_trigger_override() {
        let mut cam = controller();
        let mut map = TestMap::default();
        cam.decide(&mut map, ms(1000), &Selection::all(), &[tracked("a", "jang", None, 35.0)]);

        // Center settle window is 220 ms
        assert!(!cam.handle_map_event(MapEvent::ZoomChanged, ms(1100)));
        assert!(!cam.is_manual(ms(1100)));

        assert!(cam.handle_map_event(MapEvent::ZoomChanged, ms(1300)));
        assert_eq!(cam.state().override_reason.as_deref(), Some("map-zoom"));
    }

    #[test]
    fn test_override_suppresses_follow_pan() {
        let mut cam = controller();
        let mut map = TestMap::default();
        let selection = Selection::all().with_operator(1);
        cam.decide(&mut map, ms(0), &selection, &[tracked("a", "jang", Some(1), 35.0)]);
        cam.handle_map_event(MapEvent::DragStart, ms(1000));

        assert_eq!(cam.target_id(), None);
        assert!(!cam.on_position(&mut map, "a", LatLng::new(35.1, 126.9), ms(2000)));
    }

    #[test]
    fn test_widget_failure_is_contained() {
        let mut cam = controller();
        let mut map = TestMap::failing_camera();
        let selection = Selection::all().with_operator(1);
        let action = cam.decide(&mut map, ms(0), &selection, &[tracked("a", "jang", Some(1), 35.0)]);
        assert_eq!(action, CameraAction::Locked { target_id: "a".into() });
        assert_eq!(cam.state().last_followed_position, None);
    }
}
