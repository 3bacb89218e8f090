//! Scenario runner - drives the tracking engine through simulated fleets.
//!
//! Every scenario wires the same pieces together: a [`SimContext`] virtual
//! clock, a [`FleetOracle`] producing noisy telemetry, a [`RecordingMap`]
//! and [`ManualFrames`]. The loop advances one display frame at a time and
//! delivers a telemetry batch every `feed_interval_ms`.

use crate::context::SimContext;
use crate::exporter::{SimEvent, SimExport, SimFrame, VehiclePosition};
use crate::frames::ManualFrames;
use crate::oracle::FleetOracle;
use crate::recording_map::{CameraCommand, RecordingMap};
use crate::scenarios::ScenarioId;

use fleetview_core::{CameraMode, ConfigError, EngineConfig, Selection, TrackingEngine};
use fleetview_env::{FleetContext, FrameDriver, LatLng, MapEvent, ViewId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from the simulation harness itself.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid simulation config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of vehicles to spawn
    pub vehicles: usize,

    /// Display frame rate in Hz
    pub frame_rate_hz: u32,

    /// Interval between telemetry batches
    pub feed_interval_ms: u64,

    /// Simulation duration in seconds (scenarios may extend it)
    pub duration_secs: f64,

    /// GPS noise standard deviation in meters
    pub noise_m: f64,

    /// Probability a vehicle's record is missing from a batch
    pub drop_probability: f64,

    /// Export every n-th frame when exporting
    pub export_every_frames: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            vehicles: 6,
            frame_rate_hz: 60,
            feed_interval_ms: 1000,
            duration_secs: 10.0,
            noise_m: 4.0,
            drop_probability: 0.0,
            export_every_frames: 6,
        }
    }
}

impl SimConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Display frames simulated
    pub total_frames: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Entities known to the engine at the end
    pub final_entity_count: usize,

    /// Camera mode at the end
    pub camera_mode: String,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub batches: u64,
    pub feed_errors: u64,
    pub dropped_records: u64,
    pub low_confidence_ids: u64,
    pub pruned: u64,
    pub engine_frames: u64,
    pub frame_starts: u64,
    pub camera_commands: usize,
    pub pans: usize,
    pub widget_calls: u64,
    pub widget_failures: u64,
    pub marker_moves: u64,
}

type SimEngine = TrackingEngine<SimContext, RecordingMap, ManualFrames>;

/// One running simulation.
struct Simulation {
    context: Arc<SimContext>,
    oracle: FleetOracle,
    engine: SimEngine,
    frame_dt: Duration,
    feed_every: u64,
    frame: u64,
    export: Option<SimExport>,
    export_every: u64,
    pending_events: Vec<SimEvent>,
}

impl Simulation {
    fn new(
        scenario: ScenarioId,
        config: &SimConfig,
        engine_config: EngineConfig,
        widget: RecordingMap,
        export: bool,
    ) -> Self {
        let context = SimContext::shared(config.seed);
        let physics_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let mut oracle = FleetOracle::new(physics_seed);
        oracle.set_noise(config.noise_m);
        oracle.set_drop_probability(config.drop_probability);

        let engine = TrackingEngine::new(Arc::clone(&context), widget, ManualFrames::new(), engine_config)
            .with_view_id(ViewId::from_seed(config.seed));

        let frame_rate = config.frame_rate_hz.max(1) as u64;
        let feed_every = (config.feed_interval_ms * frame_rate / 1000).max(1);

        Self {
            context,
            oracle,
            engine,
            frame_dt: Duration::from_secs_f64(1.0 / frame_rate as f64),
            feed_every,
            frame: 0,
            export: export.then(|| SimExport::new(scenario.name(), config.seed)),
            export_every: config.export_every_frames.max(1),
            pending_events: Vec::new(),
        }
    }

    /// Spawns `n` vehicles alternating between `jang` and `chosun`; operator
    /// ids count up per organization.
    fn spawn_fleet(&mut self, n: usize) {
        let origin = self.engine.config().camera.default_center;
        for i in 0..n {
            let org = if i % 2 == 0 { "jang" } else { "chosun" };
            self.oracle.spawn_vehicle(org, (i / 2) as i64, origin);
        }
    }

    fn time(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    fn event(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(t = self.time(), "{}", message);
        self.pending_events.push(SimEvent::info(message));
    }

    fn deliver(&mut self) {
        let payload = self.oracle.payload(self.context.epoch_millis());
        if let Err(e) = self.engine.ingest_payload(&payload) {
            warn!(error = %e, "oracle payload rejected");
        }
    }

    /// One display frame.
    fn step(&mut self) {
        self.frame += 1;
        self.context.advance_time(self.frame_dt);
        self.oracle.step(self.frame_dt.as_secs_f64());

        if self.frame % self.feed_every == 0 {
            self.deliver();
        }
        if self.engine.frames().is_running() {
            self.engine.on_frame();
        }
        if self.frame % self.export_every == 0 {
            self.capture();
        }
    }

    fn run_until(&mut self, end_secs: f64, mut hook: impl FnMut(&mut Self)) {
        while self.time() < end_secs {
            hook(self);
            self.step();
        }
    }

    fn capture(&mut self) {
        let Some(export) = self.export.as_mut() else {
            return;
        };
        let ground_truth = self
            .oracle
            .active_vehicles()
            .into_iter()
            .map(|v| VehiclePosition::new(v.expected_id(), v.position))
            .collect();
        let rendered = self
            .engine
            .render()
            .ids()
            .filter_map(|id| {
                self.engine
                    .rendered_position(id)
                    .map(|p| VehiclePosition::new(id, p))
            })
            .collect();

        export.add_frame(SimFrame {
            time_sec: self.context.now().as_secs_f64(),
            ground_truth,
            rendered,
            camera_mode: self.engine.camera_mode().name().to_string(),
            camera_center: self.engine.widget().center(),
            events: std::mem::take(&mut self.pending_events),
        });
    }

    fn commands(&self) -> usize {
        self.engine.widget().commands().len()
    }

    fn metrics(&self) -> ScenarioMetrics {
        let stats = self.engine.stats();
        let widget = self.engine.widget();
        ScenarioMetrics {
            batches: stats.batches,
            feed_errors: stats.feed_errors,
            dropped_records: stats.dropped_records,
            low_confidence_ids: stats.low_confidence_ids,
            pruned: stats.pruned,
            engine_frames: stats.frames,
            frame_starts: self.engine.frames().starts(),
            camera_commands: widget.commands().len(),
            pans: widget
                .commands()
                .iter()
                .filter(|c| matches!(c, CameraCommand::Pan(_)))
                .count(),
            widget_calls: widget.calls(),
            widget_failures: widget.failures(),
            marker_moves: widget.marker_moves(),
        }
    }

    fn finish(
        mut self,
        scenario: ScenarioId,
        seed: u64,
        failures: Vec<String>,
    ) -> (ScenarioResult, Option<SimExport>) {
        let passed = failures.is_empty();
        let failure_reason = (!passed).then(|| failures.join("; "));

        let result = ScenarioResult {
            scenario,
            seed,
            passed,
            total_frames: self.frame,
            final_time_secs: self.time(),
            final_entity_count: self.engine.entities().len(),
            camera_mode: self.engine.camera_mode().name().to_string(),
            failure_reason: failure_reason.clone(),
            metrics: self.metrics(),
        };

        self.engine.teardown();
        let export = self.export.take().map(|mut export| {
            export.finalize(passed, failure_reason);
            export
        });
        (result, export)
    }
}

fn check(failures: &mut Vec<String>, ok: bool, message: impl Into<String>) {
    if !ok {
        failures.push(message.into());
    }
}

fn near(a: LatLng, b: LatLng, tolerance_deg: f64) -> bool {
    (a.lat - b.lat).abs() <= tolerance_deg && (a.lng - b.lng).abs() <= tolerance_deg
}

/// Runs scenarios.
pub struct ScenarioRunner {
    config: SimConfig,
    engine_config: EngineConfig,
}

impl ScenarioRunner {
    /// Creates a runner with default settings and the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            config: SimConfig {
                seed,
                ..SimConfig::default()
            },
            engine_config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_engine_config(mut self, engine_config: EngineConfig) -> Self {
        self.engine_config = engine_config;
        self
    }

    /// Sets the minimum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.config.duration_secs = secs;
        self
    }

    pub fn seed(&self) -> u64 {
        self.config.seed
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, false).0
    }

    /// Runs a scenario and returns the frame-by-frame export with the result.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let (result, export) = self.execute(scenario, true);
        let export = export.unwrap_or_else(|| SimExport::new(scenario.name(), self.config.seed));
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, export: bool) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.config.seed);

        let widget = match scenario {
            ScenarioId::WidgetFaults => RecordingMap::with_faults(7),
            _ => RecordingMap::new(),
        };
        let mut sim = Simulation::new(scenario, &self.config, self.engine_config.clone(), widget, export);

        let failures = match scenario {
            ScenarioId::FollowOperator => self.run_follow_operator(&mut sim),
            ScenarioId::GroupFit => self.run_group_fit(&mut sim),
            ScenarioId::ManualOverride => self.run_manual_override(&mut sim),
            ScenarioId::FeedDropout => self.run_feed_dropout(&mut sim),
            ScenarioId::AliasChaos => self.run_alias_chaos(&mut sim),
            ScenarioId::WidgetFaults => self.run_widget_faults(&mut sim),
        };

        let (result, export) = sim.finish(scenario, self.config.seed, failures);
        if result.passed {
            info!("✓ {} complete in {} frames", scenario.name(), result.total_frames);
        } else {
            warn!(
                "✗ {} failed: {}",
                scenario.name(),
                result.failure_reason.as_deref().unwrap_or("unknown")
            );
        }
        (result, export)
    }

    fn duration(&self, minimum: f64) -> f64 {
        self.config.duration_secs.max(minimum)
    }

    fn fleet_size(&self) -> usize {
        self.config.vehicles.max(6)
    }

    /// FV-001: FollowOperator - lock onto jang operator 1 and pan after it.
    fn run_follow_operator(&self, sim: &mut Simulation) -> Vec<String> {
        info!("FV-001: FollowOperator - follow one vehicle");
        sim.spawn_fleet(self.fleet_size());
        sim.deliver();

        // jang vehicles are indices 0, 2, 4 with operator ids 0, 1, 2
        let target = sim.oracle.vehicles()[2].expected_id();
        sim.engine.set_selection(Selection::org("jang").with_operator(1));
        sim.event(format!("selected jang / operator 1 -> {}", target));

        sim.run_until(self.duration(8.0), |_| {});

        let mut failures = Vec::new();
        let expected = CameraMode::FollowingEntity {
            target_id: target.clone(),
        };
        check(
            &mut failures,
            sim.engine.camera_mode() == &expected,
            format!("camera mode {:?}, expected {:?}", sim.engine.camera_mode(), expected),
        );
        check(&mut failures, sim.metrics().pans > 0, "camera never panned");
        check(
            &mut failures,
            sim.engine.render().len() == 1,
            format!("{} markers visible, expected 1", sim.engine.render().len()),
        );
        match (sim.engine.widget().center(), sim.engine.rendered_position(&target)) {
            (Some(center), Some(rendered)) => check(
                &mut failures,
                near(center, rendered, 0.001),
                format!("camera at {:?}, target rendered at {:?}", center, rendered),
            ),
            _ => failures.push("camera or target position missing".to_string()),
        }
        failures
    }

    /// FV-002: GroupFit - bounds, lone-vehicle center and empty fallback.
    fn run_group_fit(&self, sim: &mut Simulation) -> Vec<String> {
        info!("FV-002: GroupFit - organization framing");
        let n = self.fleet_size();
        sim.spawn_fleet(n);
        sim.deliver();
        sim.engine.set_selection(Selection::org("chosun"));

        let mut failures = Vec::new();
        let chosun_count = n / 2;
        match sim.engine.widget().commands().last() {
            Some(CameraCommand::Bounds { positions, padding }) => {
                check(
                    &mut failures,
                    positions.len() == chosun_count,
                    format!("bounds over {} vehicles, expected {}", positions.len(), chosun_count),
                );
                let expected = self.engine_config.camera.bounds_padding_px;
                check(&mut failures, *padding == expected, format!("bounds padding {}", padding));
            }
            other => failures.push(format!("expected bounds fit, got {:?}", other)),
        }

        // Leave a single chosun vehicle
        sim.run_until(2.0, |_| {});
        let chosun: Vec<u64> = sim
            .oracle
            .vehicles()
            .iter()
            .filter(|v| v.org == "chosun")
            .map(|v| v.index)
            .collect();
        for index in chosun.iter().skip(1) {
            sim.oracle.retire_vehicle(*index);
        }
        sim.event("chosun fleet reduced to one vehicle");
        sim.run_until(6.0, |_| {});

        let lone = chosun.first().and_then(|i| sim.oracle.vehicle(*i)).map(|v| v.expected_id());
        let lone_pos = lone.as_deref().and_then(|id| sim.engine.rendered_position(id));
        match (sim.engine.widget().commands().last(), lone_pos) {
            (Some(CameraCommand::Center(at)), Some(pos)) => check(
                &mut failures,
                near(*at, pos, 0.001),
                format!("centered at {:?}, lone vehicle at {:?}", at, pos),
            ),
            (other, _) => failures.push(format!("expected lone-vehicle center, got {:?}", other)),
        }

        // An organization with no vehicles falls back to the default center
        sim.engine.set_selection(Selection::org("jang-test"));
        sim.event("selected empty organization");
        sim.run_until(self.duration(8.0), |_| {});

        let default_center = self.engine_config.camera.default_center;
        check(
            &mut failures,
            sim.engine.widget().commands().last() == Some(&CameraCommand::Center(default_center)),
            format!("expected fallback center, got {:?}", sim.engine.widget().commands().last()),
        );
        check(
            &mut failures,
            sim.engine.camera_mode()
                == &CameraMode::FollowingGroup {
                    org_key: Some("jang-test".into()),
                },
            format!("camera mode {:?}", sim.engine.camera_mode()),
        );
        failures
    }

    /// FV-003: ManualOverride - gesture, selection change, timed override.
    fn run_manual_override(&self, sim: &mut Simulation) -> Vec<String> {
        info!("FV-003: ManualOverride - user takes the camera");
        sim.spawn_fleet(self.fleet_size());
        sim.deliver();
        sim.engine.set_selection(Selection::org("jang").with_operator(1));

        let mut failures = Vec::new();

        // Drag once the controller's own settle window has closed
        let mut commands_at_drag = None;
        sim.run_until(6.0, |sim| {
            if sim.time() < 3.0 {
                return;
            }
            match commands_at_drag {
                None => {
                    let now = sim.context.now();
                    if !sim.engine.camera().is_programmatic(now) && sim.engine.handle_map_event(MapEvent::DragStart) {
                        commands_at_drag = Some(sim.commands());
                        sim.event("user drag");
                    }
                }
                Some(count) => {
                    if sim.commands() != count {
                        failures.push(format!("camera moved during gesture override at t={:.2}", sim.time()));
                        commands_at_drag = Some(sim.commands());
                    }
                }
            }
        });
        check(&mut failures, commands_at_drag.is_some(), "drag never registered");

        // Selection change ends the gesture override
        let before = sim.commands();
        sim.engine.set_selection(Selection::org("jang").with_operator(2));
        sim.event("selected jang / operator 2");
        check(&mut failures, sim.commands() > before, "selection change did not move the camera");

        // External timed override
        sim.run_until(8.0, |_| {});
        sim.engine.notify_manual_interaction(Some("roster-panel"), Some(Duration::from_secs(3)));
        sim.event("external override for 3s");
        let at_override = sim.commands();
        sim.run_until(10.9, |_| {});
        check(
            &mut failures,
            sim.commands() == at_override,
            "camera moved during external override",
        );

        sim.run_until(self.duration(14.0), |_| {});
        check(
            &mut failures,
            sim.commands() > at_override,
            "camera did not resume after override expiry",
        );
        let target = sim.oracle.vehicles()[4].expected_id();
        check(
            &mut failures,
            sim.engine.camera_mode() == &CameraMode::FollowingEntity { target_id: target },
            format!("camera mode {:?} after expiry", sim.engine.camera_mode()),
        );
        failures
    }

    /// FV-004: FeedDropout - pruning, disposal and bad payloads.
    fn run_feed_dropout(&self, sim: &mut Simulation) -> Vec<String> {
        info!("FV-004: FeedDropout - vehicles go silent");
        let n = self.fleet_size();
        sim.spawn_fleet(n);
        sim.deliver();

        sim.run_until(4.0, |_| {});
        let silent = [n as u64 - 2, n as u64 - 1];
        for index in silent {
            sim.oracle.retire_vehicle(index);
        }
        sim.event("two vehicles stopped reporting");

        for garbage in ["{\"lat\": 35.1,", "[]", "42"] {
            let _ = sim.engine.ingest_payload(garbage);
        }
        sim.event("garbage payloads delivered");

        sim.run_until(self.duration(10.0), |_| {});

        let mut failures = Vec::new();
        let live = n - silent.len();
        check(
            &mut failures,
            sim.engine.entities().len() == live,
            format!("{} entities, expected {}", sim.engine.entities().len(), live),
        );
        check(
            &mut failures,
            sim.engine.widget().markers().len() == live && sim.engine.widget().overlays().len() == live,
            format!(
                "{} markers / {} overlays, expected {}",
                sim.engine.widget().markers().len(),
                sim.engine.widget().overlays().len(),
                live
            ),
        );
        for index in silent {
            if let Some(vehicle) = sim.oracle.vehicle(index) {
                let id = vehicle.expected_id();
                check(
                    &mut failures,
                    !sim.engine.entities().contains(&id) && !sim.engine.render().contains(&id),
                    format!("{} not pruned", id),
                );
            }
        }
        let metrics = sim.metrics();
        check(&mut failures, metrics.feed_errors == 3, format!("{} feed errors, expected 3", metrics.feed_errors));
        check(&mut failures, metrics.pruned == 2, format!("{} pruned, expected 2", metrics.pruned));
        failures
    }

    /// FV-005: AliasChaos - identity stability under aliasing.
    fn run_alias_chaos(&self, sim: &mut Simulation) -> Vec<String> {
        info!("FV-005: AliasChaos - inconsistent schemas");
        let n = self.fleet_size();
        sim.oracle.set_alias_chaos(true);
        sim.spawn_fleet(n);
        sim.deliver();
        sim.run_until(self.duration(8.0), |_| {});

        let mut failures = Vec::new();
        check(
            &mut failures,
            sim.engine.entities().len() == n,
            format!("{} entities for {} vehicles", sim.engine.entities().len(), n),
        );
        for vehicle in sim.oracle.vehicles() {
            let id = vehicle.expected_id();
            check(&mut failures, sim.engine.entities().contains(&id), format!("missing {}", id));
        }
        let metrics = sim.metrics();
        check(
            &mut failures,
            metrics.low_confidence_ids == 0 && metrics.dropped_records == 0,
            format!(
                "{} low-confidence ids, {} dropped records",
                metrics.low_confidence_ids, metrics.dropped_records
            ),
        );
        failures
    }

    /// FV-006: WidgetFaults - contained map failures.
    fn run_widget_faults(&self, sim: &mut Simulation) -> Vec<String> {
        info!("FV-006: WidgetFaults - failing map SDK");
        let n = self.fleet_size();
        sim.spawn_fleet(n);
        sim.deliver();
        sim.engine.set_selection(Selection::org("jang").with_operator(1));
        sim.run_until(self.duration(8.0), |_| {});

        let mut failures = Vec::new();
        let metrics = sim.metrics();
        check(&mut failures, metrics.widget_failures > 0, "no faults were injected");
        check(&mut failures, metrics.marker_moves > 0, "markers never moved");
        check(
            &mut failures,
            sim.engine.entities().len() == n,
            format!("{} entities for {} vehicles", sim.engine.entities().len(), n),
        );
        check(
            &mut failures,
            sim.engine.widget().markers().len() <= n,
            format!("{} markers leaked", sim.engine.widget().markers().len()),
        );
        check(
            &mut failures,
            matches!(sim.engine.camera_mode(), CameraMode::FollowingEntity { .. }),
            format!("camera mode {:?}", sim.engine.camera_mode()),
        );
        failures
    }
}
