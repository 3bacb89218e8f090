//! Organization / operator selection and the visible subset it yields.

use crate::entity_map::EntityMap;
use crate::identity::{org_key_for_selection, NormalizedEntity};
use serde::{Deserialize, Serialize};

/// The current selection input.
///
/// Delivered as whole values; comparing two selections tells the camera
/// controller whether the selection actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Resolved organization key, `None` for "no organization"
    pub org_key: Option<String>,
    /// Operator filter, `None` for "all"
    pub operator_id: Option<i64>,
}

impl Selection {
    /// Everything visible.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build from a raw organization identifier (key or label) and an
    /// optional operator filter.
    pub fn new(org: Option<&str>, operator_id: Option<i64>) -> Self {
        Self {
            org_key: org.and_then(org_key_for_selection),
            operator_id,
        }
    }

    pub fn org(org: &str) -> Self {
        Self::new(Some(org), None)
    }

    pub fn with_operator(mut self, operator_id: i64) -> Self {
        self.operator_id = Some(operator_id);
        self
    }

    /// Whether `entity` passes the organization filter alone.
    pub fn matches_org(&self, entity: &NormalizedEntity) -> bool {
        self.org_key
            .as_deref()
            .map_or(true, |key| entity.org_key == key)
    }

    /// Whether `entity` passes both filters.
    pub fn matches(&self, entity: &NormalizedEntity) -> bool {
        self.matches_org(entity)
            && self
                .operator_id
                .map_or(true, |op| entity.operator_id == Some(op))
    }
}

/// Visible entities in first-seen order.
pub fn visible_entities<'a>(map: &'a EntityMap, selection: &Selection) -> Vec<&'a NormalizedEntity> {
    map.entities()
        .into_iter()
        .filter(|entity| selection.matches(entity))
        .collect()
}
