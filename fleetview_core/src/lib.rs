//! FleetView Core - Live vehicle tracking engine
//!
//! Turns a noisy, schema-inconsistent telemetry stream into smoothly moving
//! map markers and a camera that follows what the user selected:
//! 1. **Identity**: aliased records resolve to stable canonical ids
//! 2. **Smoothing**: exponential filtering suppresses GPS jitter
//! 3. **Motion**: distance-timed, eased segments animate each marker
//! 4. **Camera**: a follow state machine that yields to manual control
//!
//! All environment access (clock, map widget, frame scheduling) goes through
//! the traits in `fleetview_env`.

pub mod camera;
pub mod config;
pub mod engine;
pub mod entity_map;
pub mod feed;
pub mod identity;
pub mod motion;
pub mod render_sync;
pub mod smoothing;
pub mod visibility;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use camera::{
    CameraAction, CameraFollowController, CameraFollowState, CameraMode, OverrideSource,
    OverrideUntil, TrackedPosition,
};
pub use config::{
    CameraConfig, ConfigError, EngineConfig, FeedConfig, MapConfig, MotionConfig, SettleWindows,
    SmoothingConfig,
};
pub use engine::{EngineStats, EntitySetCallback, TrackingEngine};
pub use entity_map::{EntityMap, EntitySummary, MergeReport};
pub use feed::{decode_payload, FeedError};
pub use identity::{normalize, IdentityConfidence, NormalizedEntity};
pub use motion::{haversine_m, segment_duration, MotionInterpolator, MotionSegment};
pub use render_sync::{freshness_label, speed_label, RenderSync};
pub use smoothing::PositionFilter;
pub use visibility::{visible_entities, Selection};
