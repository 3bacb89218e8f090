//! FleetView deterministic simulation harness
//!
//! Runs the tracking engine against a simulated fleet with everything
//! non-deterministic pulled under control:
//! - **Time**: a virtual clock advanced one display frame at a time
//! - **Map**: a recording widget that logs camera commands and can inject faults
//! - **Frames**: a frame driver the loop pumps while the engine asks for frames
//! - **Randomness**: kinematics, GPS noise and field aliasing from one seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  payload   ┌─────────────────┐  calls   ┌──────────────┐
//! │ FleetOracle  │──────────► │ TrackingEngine  │────────► │ RecordingMap │
//! │ (truth+noise)│            │                 │          │ (commands)   │
//! └──────────────┘            └────────▲────────┘          └──────────────┘
//!                                      │ on_frame
//!                             ┌────────┴────────┐
//!                             │ ScenarioRunner  │ SimContext (virtual clock)
//!                             └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use fleetview_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::FollowOperator);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod frames;
mod oracle;
mod recording_map;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{SimEvent, SimExport, SimFrame, VehiclePosition};
pub use frames::ManualFrames;
pub use oracle::{offset, AliasStyle, FleetOracle, GroundTruthVehicle};
pub use recording_map::{CameraCommand, MarkerState, OverlayState, RecordingMap};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, SimConfig, SimError};
pub use scenarios::ScenarioId;
