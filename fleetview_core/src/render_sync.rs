//! Reconciles the visible entity set against live map-widget handles.
//!
//! Each visible id owns at most one marker and one overlay. Widget failures
//! are logged and contained per call; a slot whose create failed is retried
//! on the next sync.

use crate::config::MapConfig;
use crate::identity::NormalizedEntity;
use fleetview_env::{
    LatLng, MapWidget, MarkerHandle, MarkerOptions, OverlayContent, OverlayHandle,
};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

// ============================================================================
// LABELS
// ============================================================================

/// Speed text shown in the overlay.
pub fn speed_label(speed_kmh: Option<f64>) -> String {
    match speed_kmh {
        Some(speed) if speed.is_finite() => format!("{} km/h", speed.round() as i64),
        _ => "속도 정보 없음".to_string(),
    }
}

/// Relative freshness text, recomputed at render time.
pub fn freshness_label(updated_at_ms: i64, now_ms: i64) -> String {
    let diff_sec = ((now_ms - updated_at_ms).max(0) as f64 / 1000.0).round() as i64;
    if diff_sec < 1 {
        return "방금 업데이트".to_string();
    }
    if diff_sec < 60 {
        return format!("{}s 전 업데이트", diff_sec);
    }
    let diff_min = (diff_sec as f64 / 60.0).round() as i64;
    if diff_min < 60 {
        return format!("{}m 전 업데이트", diff_min);
    }
    let diff_hour = (diff_min as f64 / 60.0).round() as i64;
    format!("{}h 전 업데이트", diff_hour)
}

pub fn overlay_content(entity: &NormalizedEntity, now_ms: i64) -> OverlayContent {
    OverlayContent {
        speed_text: speed_label(entity.speed),
        updated_text: freshness_label(entity.updated_at, now_ms),
    }
}

// ============================================================================
// RENDER SYNC
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RenderSlot {
    marker: Option<MarkerHandle>,
    overlay: Option<OverlayHandle>,
}

/// One visible entity handed to [`RenderSync::sync`].
#[derive(Debug, Clone, Copy)]
pub struct VisibleEntity<'a> {
    pub entity: &'a NormalizedEntity,
    /// Where the marker is currently drawn
    pub rendered: LatLng,
    /// Smoothed target; the overlay is anchored here
    pub smoothed: LatLng,
}

/// Result of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub disposed: Vec<String>,
}

/// Marker/overlay handles per visible entity id.
#[derive(Debug, Clone)]
pub struct RenderSync {
    slots: BTreeMap<String, RenderSlot>,
    marker_image: Option<String>,
    marker_z_index: i32,
}

impl RenderSync {
    pub fn new(config: &MapConfig) -> Self {
        Self {
            slots: BTreeMap::new(),
            marker_image: config.marker_image.clone(),
            marker_z_index: config.marker_z_index,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn marker(&self, id: &str) -> Option<MarkerHandle> {
        self.slots.get(id).and_then(|slot| slot.marker)
    }

    pub fn overlay(&self, id: &str) -> Option<OverlayHandle> {
        self.slots.get(id).and_then(|slot| slot.overlay)
    }

    /// Bring handles in line with `visible`.
    ///
    /// New ids get a marker and overlay, existing ids get fresh overlay text
    /// and position, ids no longer visible are disposed.
    pub fn sync<W: MapWidget + ?Sized>(
        &mut self,
        widget: &mut W,
        visible: &[VisibleEntity<'_>],
        now_ms: i64,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let visible_ids: HashSet<&str> = visible.iter().map(|v| v.entity.id.as_str()).collect();

        for item in visible {
            let id = item.entity.id.as_str();
            let content = overlay_content(item.entity, now_ms);
            let is_new = !self.slots.contains_key(id);
            let slot = self.slots.entry(id.to_string()).or_default();

            match slot.marker {
                Some(marker) => {
                    if let Err(e) = widget.set_marker_position(marker, item.rendered) {
                        warn!(entity = id, error = %e, "marker update failed");
                    }
                }
                None => {
                    let options = MarkerOptions {
                        title: item.entity.name.clone(),
                        image: self.marker_image.clone(),
                        z_index: self.marker_z_index,
                    };
                    match widget.create_marker(item.rendered, &options) {
                        Ok(marker) => slot.marker = Some(marker),
                        Err(e) => warn!(entity = id, error = %e, "marker create failed"),
                    }
                }
            }

            match slot.overlay {
                Some(overlay) => {
                    if let Err(e) = widget.set_overlay_content(overlay, &content) {
                        warn!(entity = id, error = %e, "overlay content update failed");
                    }
                    if let Err(e) = widget.set_overlay_position(overlay, item.smoothed) {
                        warn!(entity = id, error = %e, "overlay move failed");
                    }
                }
                None => match widget.create_overlay(item.smoothed, &content) {
                    Ok(overlay) => slot.overlay = Some(overlay),
                    Err(e) => warn!(entity = id, error = %e, "overlay create failed"),
                },
            }

            if is_new {
                report.created.push(id.to_string());
            }
        }

        let stale: Vec<String> = self
            .slots
            .keys()
            .filter(|id| !visible_ids.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            if self.dispose(widget, &id) {
                report.disposed.push(id);
            }
        }

        report
    }

    /// Per-frame marker move.
    pub fn move_marker<W: MapWidget + ?Sized>(&mut self, widget: &mut W, id: &str, position: LatLng) {
        if let Some(marker) = self.marker(id) {
            if let Err(e) = widget.set_marker_position(marker, position) {
                warn!(entity = id, error = %e, "marker move failed");
            }
        }
    }

    /// Remove an entity's marker and overlay. Safe to call repeatedly.
    ///
    /// Returns whether a slot existed. The slot is dropped even if the
    /// widget refuses the removal.
    pub fn dispose<W: MapWidget + ?Sized>(&mut self, widget: &mut W, id: &str) -> bool {
        let Some(slot) = self.slots.remove(id) else {
            return false;
        };
        if let Some(marker) = slot.marker {
            if let Err(e) = widget.remove_marker(marker) {
                warn!(entity = id, error = %e, "marker removal failed");
            }
        }
        if let Some(overlay) = slot.overlay {
            if let Err(e) = widget.remove_overlay(overlay) {
                warn!(entity = id, error = %e, "overlay removal failed");
            }
        }
        true
    }

    /// Dispose every slot; returns the disposed ids.
    pub fn dispose_all<W: MapWidget + ?Sized>(&mut self, widget: &mut W) -> Vec<String> {
        let ids: Vec<String> = self.slots.keys().cloned().collect();
        ids.into_iter()
            .filter(|id| self.dispose(widget, id))
            .collect()
    }

    /// Restyle every live marker and use `image` for new ones.
    pub fn set_marker_image<W: MapWidget + ?Sized>(&mut self, widget: &mut W, image: &str) {
        self.marker_image = Some(image.to_string());
        for (id, slot) in &self.slots {
            if let Some(marker) = slot.marker {
                if let Err(e) = widget.set_marker_image(marker, image) {
                    warn!(entity = %id, error = %e, "marker restyle failed");
                }
            }
        }
    }
}
