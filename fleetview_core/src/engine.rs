//! Tracking Engine - Orchestrates the FleetView components for one map view.
//!
//! ```text
//! telemetry ─▶ feed ─▶ identity ─▶ EntityMap ─▶ visibility ─┬─▶ motion ─┐
//!                                                            └─▶ render  │
//!                                        camera ◀── rendered positions ─┘
//! ```
//!
//! The engine is driven from two sites only: telemetry deliveries
//! ([`TrackingEngine::ingest_payload`]) and display frames
//! ([`TrackingEngine::on_frame`]). Both run on the host's single UI thread.
//!
//! # Usage
//!
//! ```ignore
//! let ctx = SystemContext::shared();
//! let mut engine = TrackingEngine::new(ctx, widget, frames, EngineConfig::default());
//! engine.on_entities_changed(|list| roster.replace(list));
//!
//! // telemetry callback
//! let _ = engine.ingest_payload(&text);
//! // frame callback while the frame driver is running
//! engine.on_frame();
//! ```

use crate::camera::{CameraAction, CameraFollowController, CameraMode, OverrideSource, TrackedPosition};
use crate::config::EngineConfig;
use crate::entity_map::{EntityMap, EntitySummary, MergeReport};
use crate::feed::{decode_payload, FeedError};
use crate::motion::MotionInterpolator;
use crate::render_sync::{RenderSync, SyncReport, VisibleEntity};
use crate::visibility::{visible_entities, Selection};
use fleetview_env::{FleetContext, FrameDriver, LatLng, ListenerId, MapEvent, MapWidget, ViewId};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, debug_span, info, warn};

/// Receives the full live entity list whenever it changes.
pub type EntitySetCallback = Box<dyn FnMut(&[EntitySummary])>;

/// Running counters for one engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub batches: u64,
    pub records: u64,
    pub dropped_records: u64,
    pub low_confidence_ids: u64,
    pub feed_errors: u64,
    pub pruned: u64,
    pub frames: u64,
}

/// One live map view: entity store, animation, render handles and camera.
///
/// Generic over the context, map widget and frame driver so the same engine
/// runs against a real map SDK or the simulation harness.
pub struct TrackingEngine<Ctx, W, F>
where
    Ctx: FleetContext,
    W: MapWidget,
    F: FrameDriver,
{
    view_id: ViewId,
    context: Arc<Ctx>,
    widget: W,
    frames: F,
    config: EngineConfig,

    entities: EntityMap,
    selection: Selection,
    interpolator: MotionInterpolator,
    render: RenderSync,
    camera: CameraFollowController,

    listeners: Vec<ListenerId>,
    on_entities_changed: Option<EntitySetCallback>,
    last_emitted: Option<Vec<EntitySummary>>,
    stats: EngineStats,
    torn_down: bool,
}

impl<Ctx, W, F> TrackingEngine<Ctx, W, F>
where
    Ctx: FleetContext,
    W: MapWidget,
    F: FrameDriver,
{
    /// Creates an engine and registers the drag/zoom listeners.
    pub fn new(context: Arc<Ctx>, widget: W, frames: F, config: EngineConfig) -> Self {
        let mut engine = Self {
            view_id: ViewId::new(),
            context,
            widget,
            frames,
            interpolator: MotionInterpolator::new(config.motion.clone(), &config.smoothing),
            render: RenderSync::new(&config.map),
            camera: CameraFollowController::new(config.camera.clone()),
            config,
            entities: EntityMap::new(),
            selection: Selection::all(),
            listeners: Vec::new(),
            on_entities_changed: None,
            last_emitted: None,
            stats: EngineStats::default(),
            torn_down: false,
        };

        for event in [MapEvent::DragStart, MapEvent::ZoomChanged] {
            match engine.widget.add_listener(event) {
                Ok(id) => engine.listeners.push(id),
                Err(e) => warn!(event = %event, error = %e, "listener registration failed"),
            }
        }
        engine
    }

    /// Replaces the view id (deterministic ids for simulation).
    pub fn with_view_id(mut self, view_id: ViewId) -> Self {
        self.view_id = view_id;
        self
    }

    /// Registers the entity-set callback. It fires immediately if entities
    /// are already known.
    pub fn on_entities_changed(&mut self, callback: impl FnMut(&[EntitySummary]) + 'static) {
        self.on_entities_changed = Some(Box::new(callback));
        self.last_emitted = None;
        if !self.entities.is_empty() {
            self.emit_entities();
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn widget(&self) -> &W {
        &self.widget
    }

    pub fn widget_mut(&mut self) -> &mut W {
        &mut self.widget
    }

    pub fn frames(&self) -> &F {
        &self.frames
    }

    pub fn entities(&self) -> &EntityMap {
        &self.entities
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn camera(&self) -> &CameraFollowController {
        &self.camera
    }

    pub fn camera_mode(&self) -> &CameraMode {
        self.camera.mode()
    }

    pub fn interpolator(&self) -> &MotionInterpolator {
        &self.interpolator
    }

    pub fn render(&self) -> &RenderSync {
        &self.render
    }

    pub fn rendered_position(&self, id: &str) -> Option<LatLng> {
        self.interpolator.rendered_position(id)
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Whether any marker still has motion queued.
    pub fn is_animating(&self) -> bool {
        self.interpolator.has_pending_work()
    }

    // ========================================================================
    // TELEMETRY
    // ========================================================================

    /// Decodes and merges one raw telemetry delivery.
    ///
    /// Undecodable payloads are logged and skipped; the engine state is left
    /// untouched and the feed may continue.
    pub fn ingest_payload(&mut self, text: &str) -> Result<MergeReport, FeedError> {
        match decode_payload(text) {
            Ok(batch) => Ok(self.ingest_batch(&batch)),
            Err(e) => {
                self.stats.feed_errors += 1;
                warn!(view = %self.view_id, error = %e, "telemetry payload skipped");
                Err(e)
            }
        }
    }

    /// Merges one decoded batch and brings animation, handles and camera up
    /// to date before returning.
    pub fn ingest_batch(&mut self, batch: &[Value]) -> MergeReport {
        if self.torn_down {
            return MergeReport::default();
        }
        let _span = debug_span!("ingest", view = %self.view_id).entered();

        let now_ms = self.context.epoch_millis();
        let context = Arc::clone(&self.context);
        let report = self.entities.merge_batch(
            batch,
            now_ms,
            || context.random_token(),
            self.config.feed.prune_after_missed_batches,
        );

        self.stats.batches += 1;
        self.stats.records += batch.len() as u64;
        self.stats.dropped_records += report.dropped as u64;
        self.stats.low_confidence_ids += report.low_confidence.len() as u64;
        self.stats.pruned += report.pruned.len() as u64;

        debug!(
            created = report.created.len(),
            updated = report.updated.len(),
            pruned = report.pruned.len(),
            dropped = report.dropped,
            redelivery = report.redelivery,
            "batch merged"
        );
        if !report.low_confidence.is_empty() {
            debug!(ids = ?report.low_confidence, "low-confidence identities");
        }

        for id in &report.pruned {
            self.interpolator.remove(id);
            self.render.dispose(&mut self.widget, id);
        }

        // Smooth and queue motion for every visible entity this batch touched
        for id in report.updated.iter() {
            let Some(entity) = self.entities.get(id) else {
                continue;
            };
            if self.selection.matches(entity) && self.interpolator.contains(id) {
                self.interpolator
                    .observe(id, LatLng::new(entity.lat, entity.lng));
            }
        }

        self.refresh_visible(now_ms);
        self.sync_frame_driver();
        self.run_decision_pass();
        self.emit_entities();
        report
    }

    // ========================================================================
    // FRAMES
    // ========================================================================

    /// Advances all markers by one display frame.
    ///
    /// Returns the number of markers moved. Stops the frame driver once no
    /// entity has pending motion.
    pub fn on_frame(&mut self) -> usize {
        if self.torn_down {
            return 0;
        }
        let now = self.context.now();
        let updates = self.interpolator.tick(now);
        self.stats.frames += 1;

        for update in &updates {
            self.render
                .move_marker(&mut self.widget, &update.id, update.position);
            self.camera
                .on_position(&mut self.widget, &update.id, update.position, now);
        }

        self.sync_frame_driver();
        updates.len()
    }

    fn sync_frame_driver(&mut self) {
        let pending = self.interpolator.has_pending_work();
        if pending && !self.frames.is_running() {
            debug!(view = %self.view_id, "frame driver start");
            self.frames.start();
        } else if !pending && self.frames.is_running() {
            debug!(view = %self.view_id, "frame driver stop");
            self.frames.stop();
        }
    }

    // ========================================================================
    // SELECTION & CAMERA HOOKS
    // ========================================================================

    /// Applies a new organization/operator selection.
    pub fn set_selection(&mut self, selection: Selection) {
        if self.torn_down || selection == self.selection {
            return;
        }
        let _span = debug_span!("selection", view = %self.view_id).entered();
        debug!(org = ?selection.org_key, operator = ?selection.operator_id, "selection changed");

        self.selection = selection;
        self.camera.on_selection_change();
        let now_ms = self.context.epoch_millis();
        self.refresh_visible(now_ms);
        self.sync_frame_driver();
        self.run_decision_pass();
    }

    /// Updates the user's own location, used as the empty-group fallback.
    pub fn set_self_location(&mut self, position: Option<LatLng>) {
        self.camera.set_self_location(position);
    }

    /// "The user is manually controlling the map."
    ///
    /// `duration: None` keeps the override until an explicit reset.
    pub fn notify_manual_interaction(&mut self, reason: Option<&str>, duration: Option<Duration>) {
        if self.torn_down {
            return;
        }
        let now = self.context.now();
        self.camera.register_manual_override(
            reason.unwrap_or("external"),
            OverrideSource::External,
            duration,
            now,
        );
    }

    /// "Reset the camera to the current selection", optionally at a zoom level.
    pub fn reset_to_selection(&mut self, reason: Option<&str>, level: Option<u8>) -> CameraAction {
        if self.torn_down {
            return CameraAction::Suppressed;
        }
        let _span = debug_span!("reset", view = %self.view_id).entered();
        debug!(reason = reason.unwrap_or("reset-selection"), level = ?level, "camera reset");

        self.camera.reset();
        if let Some(level) = level {
            let now = self.context.now();
            self.camera.set_level(&mut self.widget, level, now);
        }
        self.run_decision_pass()
    }

    /// Forwards a drag/zoom event from the widget's listeners.
    ///
    /// Returns true if it started a manual override.
    pub fn handle_map_event(&mut self, event: MapEvent) -> bool {
        if self.torn_down {
            return false;
        }
        let now = self.context.now();
        let started = self.camera.handle_map_event(event, now);
        if started {
            debug!(view = %self.view_id, event = %event, "manual override from map gesture");
        }
        started
    }

    /// Restyles every live marker.
    pub fn set_marker_image(&mut self, image: &str) {
        self.config.map.marker_image = Some(image.to_string());
        self.render.set_marker_image(&mut self.widget, image);
    }

    /// Re-syncs handles so freshness labels reflect the current time.
    pub fn refresh_labels(&mut self) -> SyncReport {
        if self.torn_down {
            return SyncReport::default();
        }
        let now_ms = self.context.epoch_millis();
        self.refresh_visible(now_ms)
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    /// Clears all motion, cancels frames, disposes every handle, removes
    /// listeners and returns the camera to `Idle`. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        let _span = debug_span!("teardown", view = %self.view_id).entered();

        self.interpolator.clear();
        self.frames.stop();
        let disposed = self.render.dispose_all(&mut self.widget);

        for listener in self.listeners.drain(..) {
            if let Err(e) = self.widget.remove_listener(listener) {
                warn!(listener = %listener, error = %e, "listener removal failed");
            }
        }

        self.camera.teardown();
        self.entities.clear();
        self.emit_entities();
        self.torn_down = true;

        info!(disposed = disposed.len(), "engine torn down");
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Reconciles animation entries and widget handles with the visible set.
    fn refresh_visible(&mut self, now_ms: i64) -> SyncReport {
        let visible = visible_entities(&self.entities, &self.selection);
        let visible_ids: HashSet<&str> = visible.iter().map(|e| e.id.as_str()).collect();

        let hidden: Vec<String> = self
            .interpolator
            .ids()
            .filter(|id| !visible_ids.contains(id))
            .map(str::to_string)
            .collect();
        for id in &hidden {
            self.interpolator.remove(id);
        }

        for entity in &visible {
            if !self.interpolator.contains(&entity.id) {
                self.interpolator
                    .observe(&entity.id, LatLng::new(entity.lat, entity.lng));
            }
        }

        let items: Vec<VisibleEntity<'_>> = visible
            .iter()
            .filter_map(|&entity| {
                let entry = self.interpolator.entry(&entity.id)?;
                Some(VisibleEntity {
                    entity,
                    rendered: entry.rendered(),
                    smoothed: entry.smoothed(),
                })
            })
            .collect();

        let report = self.render.sync(&mut self.widget, &items, now_ms);
        if !report.disposed.is_empty() {
            debug!(disposed = ?report.disposed, "markers disposed");
        }
        report
    }

    fn tracked_positions(&self) -> Vec<TrackedPosition> {
        self.entities
            .entities()
            .into_iter()
            .map(|entity| TrackedPosition {
                id: entity.id.clone(),
                org_key: entity.org_key.clone(),
                operator_id: entity.operator_id,
                position: self
                    .interpolator
                    .rendered_position(&entity.id)
                    .unwrap_or(LatLng::new(entity.lat, entity.lng)),
            })
            .collect()
    }

    fn run_decision_pass(&mut self) -> CameraAction {
        let tracked = self.tracked_positions();
        let now = self.context.now();
        let action = self
            .camera
            .decide(&mut self.widget, now, &self.selection, &tracked);
        debug!(mode = self.camera.mode().name(), action = ?action, "camera decision");
        action
    }

    fn emit_entities(&mut self) {
        let summaries = self.entities.summaries();
        if self.last_emitted.as_ref() == Some(&summaries) {
            return;
        }
        if let Some(callback) = self.on_entities_changed.as_mut() {
            callback(&summaries);
        }
        self.last_emitted = Some(summaries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CameraCall, TestMap};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Mutex;
    use std::time::SystemTime;

    #[derive(Default)]
    struct StepClock {
        now: Mutex<Duration>,
    }

    impl StepClock {
        fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl FleetContext for StepClock {
        fn now(&self) -> Duration {
            *self.now.lock().unwrap()
        }

        fn system_time(&self) -> SystemTime {
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000) + self.now()
        }

        fn random_token(&self) -> String {
            "r".to_string()
        }
    }

    #[derive(Default)]
    struct Frames {
        running: bool,
        starts: u32,
    }

    impl FrameDriver for Frames {
        fn start(&mut self) {
            self.running = true;
            self.starts += 1;
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    type TestEngine = TrackingEngine<StepClock, TestMap, Frames>;

    fn engine() -> (Arc<StepClock>, TestEngine) {
        let clock = Arc::new(StepClock::default());
        let engine = TrackingEngine::new(
            Arc::clone(&clock),
            TestMap::default(),
            Frames::default(),
            EngineConfig::default(),
        );
        (clock, engine)
    }

    fn payload(records: &[(&str, f64, i64)]) -> String {
        let list: Vec<Value> = records
            .iter()
            .map(|(id, lat, op)| {
                serde_json::json!({"busId": id, "lat": lat, "lng": 126.9, "org": "jang", "operatorId": op})
            })
            .collect();
        Value::Array(list).to_string()
    }

    #[test]
    fn test_new_registers_listeners() {
        let (_, engine) = engine();
        assert_eq!(engine.widget().listeners.len(), 2);
    }

    #[test]
    fn test_first_batch_creates_markers_without_animation() {
        let (_, mut engine) = engine();
        engine.ingest_payload(&payload(&[("a", 35.1, 0), ("b", 35.2, 1)])).unwrap();
        assert_eq!(engine.widget().markers.len(), 2);
        assert_eq!(engine.widget().overlays.len(), 2);
        assert!(!engine.frames().is_running());
    }

    #[test]
    fn test_movement_starts_and_stops_frames() {
        let (clock, mut engine) = engine();
        engine.ingest_payload(&payload(&[("a", 35.1, 0)])).unwrap();
        engine.ingest_payload(&payload(&[("a", 35.2, 0)])).unwrap();
        assert!(engine.frames().is_running());

        for _ in 0..300 {
            clock.advance(Duration::from_millis(16));
            engine.on_frame();
            if !engine.frames().is_running() {
                break;
            }
        }
        assert!(!engine.frames().is_running());
        assert!(!engine.is_animating());
        assert_eq!(engine.frames().starts, 1);
    }

    #[test]
    fn test_bad_payload_is_skipped() {
        let (_, mut engine) = engine();
        engine.ingest_payload(&payload(&[("a", 35.1, 0)])).unwrap();
        assert!(engine.ingest_payload("{oops").is_err());
        assert!(engine.ingest_payload("[]").is_err());
        assert_eq!(engine.entities().len(), 1);
        assert_eq!(engine.stats().feed_errors, 2);
    }

    #[test]
    fn test_pruned_entity_marker_disposed() {
        let (_, mut engine) = engine();
        engine.ingest_payload(&payload(&[("a", 35.1, 0), ("b", 35.2, 1)])).unwrap();
        engine.ingest_payload(&payload(&[("a", 35.11, 0)])).unwrap();
        assert_eq!(engine.widget().markers.len(), 2);

        engine.ingest_payload(&payload(&[("a", 35.12, 0)])).unwrap();
        assert_eq!(engine.widget().markers.len(), 1);
        assert!(!engine.render().contains("jang:b"));
        assert!(engine.rendered_position("jang:b").is_none());
    }

    #[test]
    fn test_follow_operator_one() {
        let (_, mut engine) = engine();
        engine.ingest_payload(&payload(&[("a", 35.1, 0), ("b", 35.2, 1)])).unwrap();
        engine.set_selection(Selection::org("jang").with_operator(1));

        assert_eq!(
            engine.camera_mode(),
            &CameraMode::FollowingEntity { target_id: "jang:b".into() }
        );
        assert_eq!(engine.render().len(), 1);
        assert!(engine.widget().camera.contains(&CameraCall::Center(LatLng::new(35.2, 126.9))));
    }

    #[test]
    fn test_entity_callback_fires_on_change_only() {
        let (_, mut engine) = engine();
        let seen: Rc<RefCell<Vec<usize>>> = Rc::default();
        let sink = Rc::clone(&seen);
        engine.on_entities_changed(move |list| sink.borrow_mut().push(list.len()));

        let batch = payload(&[("a", 35.1, 0)]);
        engine.ingest_payload(&batch).unwrap();
        engine.ingest_payload(&batch).unwrap();
        engine.ingest_payload(&payload(&[("a", 35.1, 0), ("b", 35.2, 1)])).unwrap();
        engine.teardown();

        assert_eq!(*seen.borrow(), vec![1, 2, 0]);
    }

    #[test]
    fn test_manual_gesture_blocks_camera_until_selection_change() {
        let (clock, mut engine) = engine();
        engine.ingest_payload(&payload(&[("a", 35.1, 0)])).unwrap();
        clock.advance(Duration::from_secs(1));
        assert!(engine.handle_map_event(MapEvent::DragStart));

        let moves = engine.widget().camera.len();
        engine.ingest_payload(&payload(&[("a", 35.2, 0)])).unwrap();
        assert_eq!(engine.widget().camera.len(), moves);

        engine.set_selection(Selection::org("jang"));
        assert!(engine.widget().camera.len() > moves);
    }

    #[test]
    fn test_reset_with_level() {
        let (_, mut engine) = engine();
        engine.notify_manual_interaction(Some("roster-open"), None);
        engine.reset_to_selection(None, Some(4));
        assert_eq!(engine.widget().camera.first(), Some(&CameraCall::Level(4)));
        assert!(!engine.camera().is_manual(Duration::ZERO));
    }

    #[test]
    fn test_teardown_releases_everything() {
        let (_, mut engine) = engine();
        engine.ingest_payload(&payload(&[("a", 35.1, 0)])).unwrap();
        engine.ingest_payload(&payload(&[("a", 35.2, 0)])).unwrap();
        engine.teardown();
        engine.teardown();

        assert!(engine.widget().markers.is_empty());
        assert!(engine.widget().overlays.is_empty());
        assert!(engine.widget().listeners.is_empty());
        assert!(!engine.frames().is_running());
        assert!(!engine.is_animating());
        assert_eq!(engine.camera_mode(), &CameraMode::Idle);
    }
}
