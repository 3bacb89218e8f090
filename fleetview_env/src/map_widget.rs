//! Map widget capability set.
//!
//! The engine never sees a provider SDK type. Each map provider gets an
//! adapter implementing [`MapWidget`]; the simulation harness ships an
//! in-memory recording implementation.

use crate::error::EnvError;
use crate::types::{LatLng, ListenerId, MarkerHandle, OverlayHandle};
use serde::{Deserialize, Serialize};

/// User-interaction events the engine listens for.
///
/// Listener registration tells the widget which events to surface; the
/// host forwards each delivered event to the engine on the same thread
/// that runs telemetry merges and frame ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapEvent {
    /// The user started dragging the map
    DragStart,
    /// The zoom level changed (pinch, wheel or a programmatic change)
    ZoomChanged,
}

impl MapEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MapEvent::DragStart => "dragstart",
            MapEvent::ZoomChanged => "zoom_changed",
        }
    }
}

impl std::fmt::Display for MapEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Options for a newly created marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerOptions {
    /// Tooltip/title (the entity display name)
    pub title: String,

    /// Marker image reference (URL or asset key); provider default if `None`
    pub image: Option<String>,

    /// Stacking order
    pub z_index: i32,
}

/// Text content of the speed/freshness overlay drawn above a marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayContent {
    pub speed_text: String,
    pub updated_text: String,
}

/// The capability set a map provider must expose.
///
/// Every call may fail (the underlying SDK can throw); callers are expected
/// to contain the error at the call site.
pub trait MapWidget {
    // === Markers ===

    fn create_marker(&mut self, position: LatLng, options: &MarkerOptions)
        -> Result<MarkerHandle, EnvError>;

    fn set_marker_position(&mut self, marker: MarkerHandle, position: LatLng)
        -> Result<(), EnvError>;

    fn set_marker_image(&mut self, marker: MarkerHandle, image: &str) -> Result<(), EnvError>;

    fn remove_marker(&mut self, marker: MarkerHandle) -> Result<(), EnvError>;

    // === Overlays ===

    fn create_overlay(&mut self, position: LatLng, content: &OverlayContent)
        -> Result<OverlayHandle, EnvError>;

    fn set_overlay_position(&mut self, overlay: OverlayHandle, position: LatLng)
        -> Result<(), EnvError>;

    fn set_overlay_content(&mut self, overlay: OverlayHandle, content: &OverlayContent)
        -> Result<(), EnvError>;

    fn remove_overlay(&mut self, overlay: OverlayHandle) -> Result<(), EnvError>;

    // === Camera ===

    /// Moves the camera instantly.
    fn set_center(&mut self, position: LatLng) -> Result<(), EnvError>;

    /// Moves the camera with the provider's pan animation.
    fn pan_to(&mut self, position: LatLng) -> Result<(), EnvError>;

    /// Fits the viewport around all positions with `padding` pixels on each side.
    fn set_bounds(&mut self, positions: &[LatLng], padding: u32) -> Result<(), EnvError>;

    /// Sets the zoom level.
    fn set_level(&mut self, level: u8) -> Result<(), EnvError>;

    // === Listeners ===

    fn add_listener(&mut self, event: MapEvent) -> Result<ListenerId, EnvError>;

    fn remove_listener(&mut self, listener: ListenerId) -> Result<(), EnvError>;
}
