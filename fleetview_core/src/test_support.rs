//! In-crate map widget for unit tests.

use fleetview_env::{
    EnvError, LatLng, ListenerId, MapEvent, MapWidget, MarkerHandle, MarkerOptions, OverlayContent,
    OverlayHandle,
};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum CameraCall {
    Center(LatLng),
    Pan(LatLng),
    Bounds(Vec<LatLng>, u32),
    Level(u8),
}

#[derive(Debug, Default)]
pub struct TestMap {
    pub camera: Vec<CameraCall>,
    pub markers: HashMap<MarkerHandle, LatLng>,
    pub marker_images: HashMap<MarkerHandle, String>,
    pub overlays: HashMap<OverlayHandle, (LatLng, OverlayContent)>,
    pub listeners: Vec<ListenerId>,
    pub fail_camera: bool,
    pub fail_create: bool,
    next_handle: u64,
}

impl TestMap {
    /// Every camera call fails.
    pub fn failing_camera() -> Self {
        Self {
            fail_camera: true,
            ..Self::default()
        }
    }

    /// Every marker and overlay create fails.
    pub fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn camera_call(&mut self, call: CameraCall) -> Result<(), EnvError> {
        if self.fail_camera {
            return Err(EnvError::map_call("camera", "injected"));
        }
        self.camera.push(call);
        Ok(())
    }
}

impl MapWidget for TestMap {
    fn create_marker(&mut self, position: LatLng, _options: &MarkerOptions) -> Result<MarkerHandle, EnvError> {
        if self.fail_create {
            return Err(EnvError::map_call("create_marker", "injected"));
        }
        let handle = MarkerHandle(self.next());
        self.markers.insert(handle, position);
        Ok(handle)
    }

    fn set_marker_position(&mut self, marker: MarkerHandle, position: LatLng) -> Result<(), EnvError> {
        let slot = self
            .markers
            .get_mut(&marker)
            .ok_or_else(|| EnvError::unknown(marker))?;
        *slot = position;
        Ok(())
    }

    fn set_marker_image(&mut self, marker: MarkerHandle, image: &str) -> Result<(), EnvError> {
        if !self.markers.contains_key(&marker) {
            return Err(EnvError::unknown(marker));
        }
        self.marker_images.insert(marker, image.to_string());
        Ok(())
    }

    fn remove_marker(&mut self, marker: MarkerHandle) -> Result<(), EnvError> {
        self.markers
            .remove(&marker)
            .map(|_| ())
            .ok_or_else(|| EnvError::unknown(marker))
    }

    fn create_overlay(&mut self, position: LatLng, content: &OverlayContent) -> Result<OverlayHandle, EnvError> {
        if self.fail_create {
            return Err(EnvError::map_call("create_overlay", "injected"));
        }
        let handle = OverlayHandle(self.next());
        self.overlays.insert(handle, (position, content.clone()));
        Ok(handle)
    }

    fn set_overlay_position(&mut self, overlay: OverlayHandle, position: LatLng) -> Result<(), EnvError> {
        let slot = self
            .overlays
            .get_mut(&overlay)
            .ok_or_else(|| EnvError::unknown(overlay))?;
        slot.0 = position;
        Ok(())
    }

    fn set_overlay_content(&mut self, overlay: OverlayHandle, content: &OverlayContent) -> Result<(), EnvError> {
        let slot = self
            .overlays
            .get_mut(&overlay)
            .ok_or_else(|| EnvError::unknown(overlay))?;
        slot.1 = content.clone();
        Ok(())
    }

    fn remove_overlay(&mut self, overlay: OverlayHandle) -> Result<(), EnvError> {
        self.overlays
            .remove(&overlay)
            .map(|_| ())
            .ok_or_else(|| EnvError::unknown(overlay))
    }

    fn set_center(&mut self, position: LatLng) -> Result<(), EnvError> {
        self.camera_call(CameraCall::Center(position))
    }

    fn pan_to(&mut self, position: LatLng) -> Result<(), EnvError> {
        self.camera_call(CameraCall::Pan(position))
    }

    fn set_bounds(&mut self, positions: &[LatLng], padding: u32) -> Result<(), EnvError> {
        self.camera_call(CameraCall::Bounds(positions.to_vec(), padding))
    }

    fn set_level(&mut self, level: u8) -> Result<(), EnvError> {
        self.camera_call(CameraCall::Level(level))
    }

    fn add_listener(&mut self, _event: MapEvent) -> Result<ListenerId, EnvError> {
        let id = ListenerId(self.next());
        self.listeners.push(id);
        Ok(id)
    }

    fn remove_listener(&mut self, listener: ListenerId) -> Result<(), EnvError> {
        let before = self.listeners.len();
        self.listeners.retain(|l| *l != listener);
        if self.listeners.len() == before {
            return Err(EnvError::unknown(listener));
        }
        Ok(())
    }
}
