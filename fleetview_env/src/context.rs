//! Core environment context trait for the FleetView engine.

use std::time::{Duration, SystemTime};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" clock and entropy so that the
/// tracking engine can run in production and in simulation with
/// the same code.
///
/// # Implementations
///
/// - **Production**: `SystemContext` - wraps `Instant`, `SystemTime`, UUID v4
/// - **Simulation**: `SimContext` - virtual clock plus seeded ChaCha8 RNG
///
/// # Determinism
///
/// Manual-override expiry, segment timing and pan throttling all read
/// `now()`, so advancing a virtual clock drives them exactly.
///
/// The engine is driven synchronously from the host's frame and delivery
/// callbacks, so nothing here blocks or awaits.
pub trait FleetContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for animation timing, pan throttling and override windows.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    ///
    /// Used to stamp records that carry no timestamp and to render
    /// "updated N seconds ago" labels.
    fn system_time(&self) -> SystemTime;

    /// Produces an opaque random token.
    ///
    /// Only the last-resort identity path uses this; simulation returns
    /// seeded tokens so runs stay reproducible.
    fn random_token(&self) -> String;

    /// Wall-clock time as milliseconds since the Unix epoch.
    fn epoch_millis(&self) -> i64 {
        self.system_time()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}
