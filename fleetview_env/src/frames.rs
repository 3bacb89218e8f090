//! Frame scheduler abstraction.

/// Host-side display-frame scheduler.
///
/// The engine calls [`FrameDriver::start`] when the first motion segment is
/// queued and [`FrameDriver::stop`] once no entity has pending motion. While
/// started, the host invokes the engine's frame callback once per display
/// frame. Both calls must be idempotent.
pub trait FrameDriver {
    fn start(&mut self);

    fn stop(&mut self);

    /// Whether the host is currently delivering frames.
    fn is_running(&self) -> bool;
}
