//! FleetView Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seams that let the FleetView tracking
//! engine run against a real map SDK in production and against an in-memory
//! recording widget under deterministic simulation.
//!
//! # Core Concept: Injected Environment
//!
//! Everything the engine would otherwise reach for globally is injected:
//! - Time (`now()`, `system_time()`)
//! - Randomness (`random_token()`)
//! - The map widget (markers, overlays, camera, listeners)
//! - The frame scheduler (`start()` / `stop()`)
//!
//! # Example
//!
//! ```ignore
//! use fleetview_env::FrameDriver;
//!
//! // Host frame callback: the driver decides when frames arrive
//! fn on_display_frame(engine: &mut Engine) {
//!     if engine.frames().is_running() {
//!         engine.on_frame();
//!     }
//! }
//! ```

mod context;
mod error;
mod frames;
mod map_widget;
mod system_impl;
mod types;

pub use context::FleetContext;
pub use error::EnvError;
pub use frames::FrameDriver;
pub use map_widget::{MapEvent, MapWidget, MarkerOptions, OverlayContent};
pub use system_impl::SystemContext;
pub use types::{LatLng, ListenerId, MarkerHandle, OverlayHandle, ViewId};
