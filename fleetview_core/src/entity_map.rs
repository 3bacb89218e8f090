//! Merged entity store.
//!
//! Holds the latest [`NormalizedEntity`] per canonical id. Batches merge
//! last-write-wins; entities missing from consecutive fresh batches are
//! pruned in the same call, so a frame tick never observes a half-merged map.

use crate::identity::{normalize, NormalizedEntity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// What the selection UI needs to know about a live entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    pub id: String,
    pub name: String,
    pub org_label: String,
    pub org_key: String,
    pub operator_id: Option<i64>,
    pub operator_name: Option<String>,
}

impl From<&NormalizedEntity> for EntitySummary {
    fn from(entity: &NormalizedEntity) -> Self {
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            org_label: entity.org_label.clone(),
            org_key: entity.org_key.clone(),
            operator_id: entity.operator_id,
            operator_name: entity.operator_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct EntityRecord {
    entity: NormalizedEntity,
    /// Consecutive fresh batches this entity was absent from
    missed_batches: u32,
    /// Insertion order, for stable iteration
    seq: u64,
}

/// Outcome of one merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub pruned: Vec<String>,
    /// Records dropped for unusable coordinates
    pub dropped: usize,
    /// Ids resolved with low confidence in this batch
    pub low_confidence: Vec<String>,
    /// The batch repeated the previous one and did not advance miss counters
    pub redelivery: bool,
}

impl MergeReport {
    /// Whether the set of live ids changed.
    pub fn membership_changed(&self) -> bool {
        !self.created.is_empty() || !self.pruned.is_empty()
    }
}

/// Keyed store of the latest normalized entity per canonical id.
#[derive(Debug, Clone, Default)]
pub struct EntityMap {
    records: HashMap<String, EntityRecord>,
    next_seq: u64,
    last_batch: Option<Vec<Value>>,
    /// The previous merge was itself a redelivery
    last_was_redelivery: bool,
}

impl PartialEq for EntityMap {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

impl EntityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one raw batch.
    ///
    /// # Arguments
    /// * `batch` - Raw records as delivered
    /// * `now_ms` - Wall-clock fallback timestamp
    /// * `random_token` - Last-resort identity source
    /// * `prune_after` - Consecutive misses before an entity is pruned
    ///
    /// A batch equal to the previous one is treated as a redelivery: its
    /// records are merged again but miss counters do not advance, which keeps
    /// merging idempotent. Only one repeat in a row is forgiven; a feed that
    /// keeps resending the same snapshot still ages out absent entities.
    pub fn merge_batch(
        &mut self,
        batch: &[Value],
        now_ms: i64,
        mut random_token: impl FnMut() -> String,
        prune_after: u32,
    ) -> MergeReport {
        let mut report = MergeReport {
            redelivery: !self.last_was_redelivery && self.last_batch.as_deref() == Some(batch),
            ..MergeReport::default()
        };

        let mut seen: HashSet<String> = HashSet::with_capacity(batch.len());

        for raw in batch {
            let Some(incoming) = normalize(raw, now_ms, &mut random_token) else {
                report.dropped += 1;
                continue;
            };
            if incoming.confidence.is_low() {
                report.low_confidence.push(incoming.id.clone());
            }

            let id = incoming.id.clone();
            let first_in_batch = seen.insert(id.clone());
            match self.records.get_mut(&id) {
                Some(record) => {
                    record.entity = merge_entity(&record.entity, incoming);
                    record.missed_batches = 0;
                    if first_in_batch {
                        report.updated.push(id);
                    }
                }
                None => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.records.insert(
                        id.clone(),
                        EntityRecord {
                            entity: incoming,
                            missed_batches: 0,
                            seq,
                        },
                    );
                    report.created.push(id);
                }
            }
        }

        if !report.redelivery {
            for (id, record) in self.records.iter_mut() {
                if !seen.contains(id) {
                    record.missed_batches += 1;
                }
            }
            let mut pruned: Vec<(u64, String)> = self
                .records
                .iter()
                .filter(|(_, record)| record.missed_batches >= prune_after)
                .map(|(id, record)| (record.seq, id.clone()))
                .collect();
            pruned.sort();
            for (_, id) in &pruned {
                self.records.remove(id);
            }
            report.pruned = pruned.into_iter().map(|(_, id)| id).collect();
        }

        self.last_batch = Some(batch.to_vec());
        self.last_was_redelivery = report.redelivery;
        report
    }

    pub fn get(&self, id: &str) -> Option<&NormalizedEntity> {
        self.records.get(id).map(|record| &record.entity)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Entities in first-seen order.
    pub fn entities(&self) -> Vec<&NormalizedEntity> {
        let mut records: Vec<&EntityRecord> = self.records.values().collect();
        records.sort_by_key(|record| record.seq);
        records.into_iter().map(|record| &record.entity).collect()
    }

    /// Summaries in first-seen order.
    pub fn summaries(&self) -> Vec<EntitySummary> {
        self.entities().into_iter().map(EntitySummary::from).collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.last_batch = None;
        self.last_was_redelivery = false;
    }
}

/// Last write wins, except optional fields the newer record omits.
fn merge_entity(previous: &NormalizedEntity, incoming: NormalizedEntity) -> NormalizedEntity {
    NormalizedEntity {
        speed: incoming.speed.or(previous.speed),
        operator_id: incoming.operator_id.or(previous.operator_id),
        operator_name: incoming.operator_name.or_else(|| previous.operator_name.clone()),
        ..incoming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn merge(map: &mut EntityMap, batch: &[Value]) -> MergeReport {
        map.merge_batch(batch, NOW, || "tok".to_string(), 2)
    }

    fn bus(id: &str, lat: f64) -> Value {
        json!({"busId": id, "lat": lat, "lng": 126.9, "org": "jang"})
    }

    #[test]
    fn test_merge_creates_entities() {
        let mut map = EntityMap::new();
        let report = merge(&mut map, &[bus("a", 35.0), bus("b", 35.1)]);
        assert_eq!(report.created, vec!["jang:a", "jang:b"]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let batch = vec![bus("a", 35.0), bus("b", 35.1), json!({"lat": "bad", "lng": 1})];

        let mut once = EntityMap::new();
        merge(&mut once, &batch);

        let mut twice = EntityMap::new();
        merge(&mut twice, &batch);
        let report = merge(&mut twice, &batch);

        assert!(report.redelivery);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_redelivery_does_not_prune() {
        let mut map = EntityMap::new();
        merge(&mut map, &[bus("a", 35.0), bus("b", 35.0)]);
        let only_a = vec![bus("a", 35.1)];
        merge(&mut map, &only_a);
        merge(&mut map, &only_a);
        assert!(map.contains("jang:b"));
    }

    #[test]
    fn test_repeated_snapshot_still_prunes() {
        let mut map = EntityMap::new();
        merge(&mut map, &[bus("a", 35.0), bus("b", 35.0)]);

        let only_a = vec![bus("a", 35.1)];
        let reports: Vec<MergeReport> = (0..50).map(|_| merge(&mut map, &only_a)).collect();

        assert!(!map.contains("jang:b"));
        assert_eq!(reports.iter().filter(|r| r.pruned == vec!["jang:b"]).count(), 1);
        // Only the first repeat is forgiven
        assert!(reports[1].redelivery);
        assert!(!reports[2].redelivery);
    }

    #[test]
    fn test_large_batch_updates_each_id_once() {
        let batch: Vec<Value> = (0..500).map(|i| bus(&format!("v{}", i), 35.0)).collect();
        let mut map = EntityMap::new();
        assert_eq!(merge(&mut map, &batch).created.len(), 500);

        let mut doubled = batch.clone();
        doubled.extend(batch.iter().map(|_| bus("v0", 35.5)));
        let report = merge(&mut map, &doubled);
        assert_eq!(report.updated.len(), 500);
        assert_eq!(map.get("jang:v0").unwrap().lat, 35.5);
    }

    #[test]
    fn test_pruned_after_two_consecutive_misses() {
        let mut map = EntityMap::new();
        merge(&mut map, &[bus("a", 35.0), bus("b", 35.0)]);

        let report = merge(&mut map, &[bus("a", 35.1)]);
        assert!(report.pruned.is_empty());
        assert!(map.contains("jang:b"));

        let report = merge(&mut map, &[bus("a", 35.2)]);
        assert_eq!(report.pruned, vec!["jang:b"]);
        assert!(!map.contains("jang:b"));
    }

    #[test]
    fn test_reappearance_resets_miss_counter() {
        let mut map = EntityMap::new();
        merge(&mut map, &[bus("a", 35.0), bus("b", 35.0)]);
        merge(&mut map, &[bus("a", 35.1)]);
        merge(&mut map, &[bus("b", 35.1)]);
        merge(&mut map, &[bus("a", 35.2)]);
        assert!(map.contains("jang:b"));
    }

    #[test]
    fn test_optional_fields_survive_sparse_update() {
        let mut map = EntityMap::new();
        merge(
            &mut map,
            &[json!({"id": "v1", "lat": 35.1, "lng": 126.9, "org": "jang", "operatorId": 0, "speed": 30})],
        );
        merge(&mut map, &[json!({"id": "v1", "lat": 35.2, "lng": 126.9, "org": "jang"})]);

        let entity = map.get("jang:v1").unwrap();
        assert_eq!(entity.lat, 35.2);
        assert_eq!(entity.operator_id, Some(0));
        assert_eq!(entity.speed, Some(30.0));
    }

    #[test]
    fn test_last_write_wins_within_batch() {
        let mut map = EntityMap::new();
        let report = merge(&mut map, &[bus("a", 35.0), bus("a", 35.5)]);
        assert_eq!(report.created, vec!["jang:a"]);
        assert!(report.updated.is_empty());
        assert_eq!(map.get("jang:a").unwrap().lat, 35.5);
    }

    #[test]
    fn test_dropped_and_low_confidence_reported() {
        let mut map = EntityMap::new();
        let report = merge(&mut map, &[json!({"lat": "x", "lng": 1}), json!({"lat": 35.0, "lng": 126.0})]);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.low_confidence.len(), 1);
    }

    #[test]
    fn test_summaries_in_first_seen_order() {
        let mut map = EntityMap::new();
        merge(&mut map, &[bus("z", 35.0)]);
        merge(&mut map, &[bus("z", 35.0), bus("a", 35.0)]);
        let ids: Vec<String> = map.summaries().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["jang:z", "jang:a"]);
    }
}
