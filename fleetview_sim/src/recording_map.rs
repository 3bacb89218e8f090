//! In-memory map widget that records every call.
//!
//! Stands in for a real map SDK: it keeps the marker/overlay tables and the
//! viewport, logs camera commands for assertions and can inject failures
//! into every n-th call.

use fleetview_env::{
    EnvError, LatLng, ListenerId, MapEvent, MapWidget, MarkerHandle, MarkerOptions, OverlayContent,
    OverlayHandle,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// A camera command as the widget received it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CameraCommand {
    Center(LatLng),
    Pan(LatLng),
    Bounds { positions: Vec<LatLng>, padding: u32 },
    Level(u8),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerState {
    pub position: LatLng,
    pub title: String,
    pub image: Option<String>,
    pub z_index: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayState {
    pub position: LatLng,
    pub content: OverlayContent,
}

/// Recording [`MapWidget`] with optional fault injection.
#[derive(Debug, Default)]
pub struct RecordingMap {
    markers: BTreeMap<MarkerHandle, MarkerState>,
    overlays: BTreeMap<OverlayHandle, OverlayState>,
    listeners: BTreeMap<ListenerId, MapEvent>,
    commands: Vec<CameraCommand>,
    center: Option<LatLng>,
    level: Option<u8>,
    next_handle: u64,

    /// Fail every n-th call (counted across all methods)
    fail_every: Option<u64>,
    calls: u64,
    failures: u64,
    marker_moves: u64,
}

impl RecordingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A widget whose every `n`-th call fails.
    pub fn with_faults(n: u64) -> Self {
        Self {
            fail_every: (n > 0).then_some(n),
            ..Self::default()
        }
    }

    pub fn markers(&self) -> &BTreeMap<MarkerHandle, MarkerState> {
        &self.markers
    }

    pub fn overlays(&self) -> &BTreeMap<OverlayHandle, OverlayState> {
        &self.overlays
    }

    pub fn listeners(&self) -> impl Iterator<Item = (&ListenerId, &MapEvent)> {
        self.listeners.iter()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn commands(&self) -> &[CameraCommand] {
        &self.commands
    }

    /// Viewport center after the last successful center/pan.
    pub fn center(&self) -> Option<LatLng> {
        self.center
    }

    pub fn level(&self) -> Option<u8> {
        self.level
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn marker_moves(&self) -> u64 {
        self.marker_moves
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn check(&mut self, call: &'static str) -> Result<(), EnvError> {
        self.calls += 1;
        match self.fail_every {
            Some(n) if self.calls % n == 0 => {
                self.failures += 1;
                Err(EnvError::map_call(call, "injected fault"))
            }
            _ => Ok(()),
        }
    }
}

impl MapWidget for RecordingMap {
    fn create_marker(&mut self, position: LatLng, options: &MarkerOptions) -> Result<MarkerHandle, EnvError> {
        self.check("create_marker")?;
        let handle = MarkerHandle(self.next());
        self.markers.insert(
            handle,
            MarkerState {
                position,
                title: options.title.clone(),
                image: options.image.clone(),
                z_index: options.z_index,
            },
        );
        Ok(handle)
    }

    fn set_marker_position(&mut self, marker: MarkerHandle, position: LatLng) -> Result<(), EnvError> {
        self.check("set_marker_position")?;
        let state = self.markers.get_mut(&marker).ok_or_else(|| EnvError::unknown(marker))?;
        state.position = position;
        self.marker_moves += 1;
        Ok(())
    }

    fn set_marker_image(&mut self, marker: MarkerHandle, image: &str) -> Result<(), EnvError> {
        self.check("set_marker_image")?;
        let state = self.markers.get_mut(&marker).ok_or_else(|| EnvError::unknown(marker))?;
        state.image = Some(image.to_string());
        Ok(())
    }

    fn remove_marker(&mut self, marker: MarkerHandle) -> Result<(), EnvError> {
        self.check("remove_marker")?;
        self.markers
            .remove(&marker)
            .map(|_| ())
            .ok_or_else(|| EnvError::unknown(marker))
    }

    fn create_overlay(&mut self, position: LatLng, content: &OverlayContent) -> Result<OverlayHandle, EnvError> {
        self.check("create_overlay")?;
        let handle = OverlayHandle(self.next());
        self.overlays.insert(
            handle,
            OverlayState {
                position,
                content: content.clone(),
            },
        );
        Ok(handle)
    }

    fn set_overlay_position(&mut self, overlay: OverlayHandle, position: LatLng) -> Result<(), EnvError> {
        self.check("set_overlay_position")?;
        let state = self.overlays.get_mut(&overlay).ok_or_else(|| EnvError::unknown(overlay))?;
        state.position = position;
        Ok(())
    }

    fn set_overlay_content(&mut self, overlay: OverlayHandle, content: &OverlayContent) -> Result<(), EnvError> {
        self.check("set_overlay_content")?;
        let state = self.overlays.get_mut(&overlay).ok_or_else(|| EnvError::unknown(overlay))?;
        state.content = content.clone();
        Ok(())
    }

    fn remove_overlay(&mut self, overlay: OverlayHandle) -> Result<(), EnvError> {
        self.check("remove_overlay")?;
        self.overlays
            .remove(&overlay)
            .map(|_| ())
            .ok_or_else(|| EnvError::unknown(overlay))
    }

    fn set_center(&mut self, position: LatLng) -> Result<(), EnvError> {
        self.check("set_center")?;
        self.center = Some(position);
        self.commands.push(CameraCommand::Center(position));
        Ok(())
    }

    fn pan_to(&mut self, position: LatLng) -> Result<(), EnvError> {
        self.check("pan_to")?;
        self.center = Some(position);
        self.commands.push(CameraCommand::Pan(position));
        Ok(())
    }

    fn set_bounds(&mut self, positions: &[LatLng], padding: u32) -> Result<(), EnvError> {
        self.check("set_bounds")?;
        if positions.is_empty() {
            return Err(EnvError::map_call("set_bounds", "empty bounds"));
        }
        let n = positions.len() as f64;
        self.center = Some(LatLng::new(
            positions.iter().map(|p| p.lat).sum::<f64>() / n,
            positions.iter().map(|p| p.lng).sum::<f64>() / n,
        ));
        self.commands.push(CameraCommand::Bounds {
            positions: positions.to_vec(),
            padding,
        });
        Ok(())
    }

    fn set_level(&mut self, level: u8) -> Result<(), EnvError> {
        self.check("set_level")?;
        self.level = Some(level);
        self.commands.push(CameraCommand::Level(level));
        Ok(())
    }

    fn add_listener(&mut self, event: MapEvent) -> Result<ListenerId, EnvError> {
        self.check("add_listener")?;
        let id = ListenerId(self.next());
        self.listeners.insert(id, event);
        Ok(id)
    }

    fn remove_listener(&mut self, listener: ListenerId) -> Result<(), EnvError> {
        self.check("remove_listener")?;
        self.listeners
            .remove(&listener)
            .map(|_| ())
            .ok_or_else(|| EnvError::unknown(listener))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> MarkerOptions {
        MarkerOptions {
            title: "bus".into(),
            image: None,
            z_index: 5,
        }
    }

    #[test]
    fn test_marker_lifecycle() {
        let mut map = RecordingMap::new();
        let m = map.create_marker(LatLng::new(35.0, 126.0), &options()).unwrap();
        map.set_marker_position(m, LatLng::new(35.1, 126.0)).unwrap();
        assert_eq!(map.markers()[&m].position, LatLng::new(35.1, 126.0));

        map.remove_marker(m).unwrap();
        assert!(matches!(map.remove_marker(m), Err(EnvError::UnknownHandle(_))));
    }

    #[test]
    fn test_camera_commands_recorded() {
        let mut map = RecordingMap::new();
        map.set_center(LatLng::new(1.0, 2.0)).unwrap();
        map.set_bounds(&[LatLng::new(0.0, 0.0), LatLng::new(2.0, 2.0)], 80).unwrap();
        assert_eq!(map.commands().len(), 2);
        assert_eq!(map.center(), Some(LatLng::new(1.0, 1.0)));
    }

    #[test]
    fn test_fault_injection() {
        let mut map = RecordingMap::with_faults(3);
        assert!(map.set_center(LatLng::new(0.0, 0.0)).is_ok());
        assert!(map.set_center(LatLng::new(0.0, 0.0)).is_ok());
        assert!(map.set_center(LatLng::new(0.0, 0.0)).is_err());
        assert_eq!(map.failures(), 1);
        assert_eq!(map.commands().len(), 2);
    }
}
