//! Engine configuration.
//!
//! Every tunable constant of the tracking engine lives here with its
//! production default. All sections deserialize with `#[serde(default)]`, so
//! a JSON file only needs the keys it overrides.

use fleetview_env::LatLng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// SMOOTHING
// ============================================================================

/// Configuration for the per-entity exponential position filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Weight of the new raw sample (default: 0.35)
    pub alpha: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { alpha: 0.35 }
    }
}

// ============================================================================
// MOTION
// ============================================================================

/// Configuration for segment timing and queueing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Earth radius for haversine distance (default: 6,371,000 m)
    pub earth_radius_m: f64,

    /// Assumed vehicle speed for segment timing (default: 13.8 m/s ≈ 50 km/h)
    pub reference_speed_mps: f64,

    /// Shortest segment duration (default: 320 ms)
    pub min_duration_ms: u64,

    /// Longest segment duration (default: 2200 ms)
    pub max_duration_ms: u64,

    /// Duration for zero or invalid distances (default: 350 ms)
    pub default_duration_ms: u64,

    /// Maximum queued segments per entity (default: 5)
    pub max_queue_len: usize,

    /// Minimum per-axis delta in degrees before a segment is queued (default: 1e-6)
    pub enqueue_epsilon_deg: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            earth_radius_m: 6_371_000.0,
            reference_speed_mps: 13.8,
            min_duration_ms: 320,
            max_duration_ms: 2200,
            default_duration_ms: 350,
            max_queue_len: 5,
            enqueue_epsilon_deg: 1e-6,
        }
    }
}

impl MotionConfig {
    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.min_duration_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn default_duration(&self) -> Duration {
        Duration::from_millis(self.default_duration_ms)
    }
}

// ============================================================================
// CAMERA
// ============================================================================

/// Settle windows during which the controller's own camera moves are
/// flagged programmatic and drag/zoom events are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleWindows {
    pub center_ms: u64,
    pub level_ms: u64,
    pub bounds_ms: u64,
    pub pan_ms: u64,
}

impl Default for SettleWindows {
    fn default() -> Self {
        Self {
            center_ms: 220,
            level_ms: 400,
            bounds_ms: 500,
            pan_ms: 480,
        }
    }
}

/// Configuration for the camera follow controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Per-axis movement in degrees below which no pan is issued (default: 0.00005)
    pub follow_epsilon_deg: f64,

    /// Minimum interval between follow pans (default: 140 ms)
    pub pan_interval_ms: u64,

    /// Padding in pixels around fitted bounds (default: 80)
    pub bounds_padding_px: u32,

    /// Camera target when nothing else is known
    pub default_center: LatLng,

    pub settle: SettleWindows,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            follow_epsilon_deg: 0.00005,
            pan_interval_ms: 140,
            bounds_padding_px: 80,
            default_center: LatLng::new(35.140876, 126.930593),
            settle: SettleWindows::default(),
        }
    }
}

impl CameraConfig {
    pub fn pan_interval(&self) -> Duration {
        Duration::from_millis(self.pan_interval_ms)
    }
}

// ============================================================================
// MAP / FEED
// ============================================================================

/// Marker and overlay presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Marker image reference, provider default if unset
    pub marker_image: Option<String>,
    pub marker_z_index: i32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            marker_image: None,
            marker_z_index: 5,
        }
    }
}

/// Telemetry merge behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Consecutive batches an entity may be missing from before it is pruned (default: 2)
    pub prune_after_missed_batches: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            prune_after_missed_batches: 2,
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Top-level configuration for a [`crate::TrackingEngine`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub smoothing: SmoothingConfig,
    pub motion: MotionConfig,
    pub camera: CameraConfig,
    pub map: MapConfig,
    pub feed: FeedConfig,
}

impl EngineConfig {
    /// Parse a configuration from JSON text and validate it.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Reject values that would break the engine's invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let alpha = self.smoothing.alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "smoothing.alpha must be in (0, 1], got {}",
                alpha
            )));
        }
        let m = &self.motion;
        if m.min_duration_ms > m.max_duration_ms {
            return Err(ConfigError::Invalid(format!(
                "motion.min_duration_ms ({}) exceeds max_duration_ms ({})",
                m.min_duration_ms, m.max_duration_ms
            )));
        }
        if m.max_queue_len == 0 {
            return Err(ConfigError::Invalid("motion.max_queue_len must be at least 1".into()));
        }
        if !(m.reference_speed_mps > 0.0) || !(m.earth_radius_m > 0.0) {
            return Err(ConfigError::Invalid(
                "motion.reference_speed_mps and earth_radius_m must be positive".into(),
            ));
        }
        if self.feed.prune_after_missed_batches == 0 {
            return Err(ConfigError::Invalid(
                "feed.prune_after_missed_batches must be at least 1".into(),
            ));
        }
        if !self.camera.default_center.is_finite() {
            return Err(ConfigError::Invalid("camera.default_center must be finite".into()));
        }
        Ok(())
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(String),

    #[error("Malformed config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
