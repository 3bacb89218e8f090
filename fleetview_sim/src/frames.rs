//! Frame driver controlled by the simulation loop.

use fleetview_env::FrameDriver;

/// Records start/stop requests; the runner delivers frames while running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualFrames {
    running: bool,
    starts: u64,
    stops: u64,
}

impl ManualFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> u64 {
        self.starts
    }

    pub fn stops(&self) -> u64 {
        self.stops
    }
}

impl FrameDriver for ManualFrames {
    fn start(&mut self) {
        if !self.running {
            self.running = true;
            self.starts += 1;
        }
    }

    fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.stops += 1;
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
