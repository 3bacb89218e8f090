//! The "IDENTITY" Resolver - Canonical keys for schema-inconsistent telemetry
//!
//! Upstream devices disagree on field names (`lat` vs `latitude` vs
//! `gps.lat`), on types (numbers vs numeric strings) and on which identity
//! fields they send at all. This module turns one raw record into a
//! [`NormalizedEntity`] with a canonical id that stays stable across updates
//! as long as at least one identity field is stable.
//!
//! Resolution pipeline:
//! 1. Coordinates (dropped if not finite)
//! 2. Organization detection (known tokens → verbatim label → fallback)
//! 3. Identity part selection (vehicle key → raw id → operator id → operator name)
//! 4. Best-effort fallback (position token, then random token)
//!
//! Resolution is a pure function: wall-clock time and randomness are passed in.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// ALIAS TABLES
// ============================================================================

const LAT_FIELDS: &[&str] = &["lat", "latitude", "latY", "latValue", "gps.lat", "gps.latitude"];
const LNG_FIELDS: &[&str] = &["lng", "longitude", "lon", "long", "gps.lng", "gps.longitude"];
const NAME_FIELDS: &[&str] = &["name", "routeName", "label", "title", "busName", "plateNumber"];
const SPEED_FIELDS: &[&str] = &["speed", "velocity", "speedKm", "kmh", "telemetry.speed"];
const UPDATED_FIELDS: &[&str] = &[
    "updatedAt",
    "timestamp",
    "timeStamp",
    "lastUpdated",
    "time",
    "telemetry.timestamp",
];
const ORG_FIELDS: &[&str] = &[
    "org",
    "organization",
    "orgName",
    "orgKey",
    "affiliation",
    "group",
    "operatorName",
    "operation",
    "company",
];
const VEHICLE_KEY_FIELDS: &[&str] = &[
    "busId",
    "vehicleId",
    "plateNumber",
    "operatorCode",
    "driver",
    "crew",
    "uniqueId",
    "gpsId",
];
const RAW_ID_FIELDS: &[&str] = &["id"];
const OPERATOR_ID_FIELDS: &[&str] = &["operatorId", "operator_id", "opId"];
const OPERATOR_NAME_FIELDS: &[&str] = &["operatorName", "operator_name", "operator"];

/// Display name used when a record carries none.
pub const DEFAULT_ENTITY_NAME: &str = "운행 차량";

/// Organization assigned when a record names none.
pub const FALLBACK_ORG_LABEL: &str = "복지관";
pub const FALLBACK_ORG_KEY: &str = "jang";

// ============================================================================
// KNOWN ORGANIZATIONS
// ============================================================================

struct KnownOrg {
    key: &'static str,
    label: &'static str,
    /// Cleaned tokens; a candidate matches if it contains any of them
    tokens: &'static [&'static str],
}

// Test variants come first: "chosuntest" also contains "chosun".
const KNOWN_ORGS: &[KnownOrg] = &[
    KnownOrg {
        key: "chosun-test",
        label: "조선대학교 테스트",
        tokens: &["chosuntest", "조선대학교테스트", "조선대테스트", "조선대학교test"],
    },
    KnownOrg {
        key: "jang-test",
        label: "복지관 테스트",
        tokens: &["jangtest", "복지관테스트", "복지관test"],
    },
    KnownOrg {
        key: "chosun",
        label: "조선대학교",
        tokens: &["chosun", "조선대학교", "조선대"],
    },
    KnownOrg {
        key: "jang",
        label: "복지관",
        tokens: &["jang", "복지관"],
    },
];

// ============================================================================
// NORMALIZED ENTITY
// ============================================================================

/// How much the canonical id can be trusted across updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentityConfidence {
    /// Derived from at least one identity field
    Stable,
    /// No identity field; keyed by a rounded position. Moves → new id.
    PositionDerived,
    /// No identity field and no usable position; new id every update.
    Random,
}

impl IdentityConfidence {
    pub fn is_low(&self) -> bool {
        !matches!(self, IdentityConfidence::Stable)
    }
}

/// A telemetry record after identity resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEntity {
    /// Canonical id (see module docs)
    pub id: String,

    /// Raw (unsmoothed) latitude
    pub lat: f64,

    /// Raw (unsmoothed) longitude
    pub lng: f64,

    /// Display name
    pub name: String,

    /// Speed in km/h, if reported
    pub speed: Option<f64>,

    /// Milliseconds since the Unix epoch
    pub updated_at: i64,

    pub org_label: String,
    pub org_key: String,

    pub operator_id: Option<i64>,
    pub operator_name: Option<String>,

    pub confidence: IdentityConfidence,
}

/// Result of organization detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgMatch {
    pub label: String,
    pub key: String,
}

// ============================================================================
// FIELD ACCESS
// ============================================================================

/// Look up a field by a dotted path (`"gps.lat"`).
fn field<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// First non-null alias wins, even if its value turns out unusable.
fn coalesce<'a>(record: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| field(record, alias))
}

fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.is_finite()).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn is_hangul(c: char) -> bool {
    matches!(c as u32, 0xAC00..=0xD7A3 | 0x1100..=0x11FF | 0x3130..=0x318F)
}

/// Lowercase and keep only ASCII alphanumerics and Hangul.
pub fn clean_token(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_alphanumeric() || is_hangul(*c))
        .collect()
}

/// All text candidates for the given aliases, in alias order.
fn text_candidates(record: &Value, aliases: &[&str]) -> Vec<String> {
    aliases
        .iter()
        .filter_map(|alias| field(record, alias).and_then(as_text))
        .collect()
}

// ============================================================================
// ORGANIZATION DETECTION
// ============================================================================

fn match_known(candidate: &str) -> Option<&'static KnownOrg> {
    let cleaned = clean_token(candidate);
    if cleaned.is_empty() {
        return None;
    }
    KNOWN_ORGS
        .iter()
        .find(|org| org.tokens.iter().any(|token| cleaned.contains(token)))
}

/// Detect the organization of a record.
///
/// Candidates are checked in alias order against the known tokens; the first
/// match wins. Without a match the first non-empty candidate becomes the
/// label verbatim with a cleaned key. Without candidates the fallback
/// organization is used.
pub fn detect_org(record: &Value) -> OrgMatch {
    let candidates = text_candidates(record, ORG_FIELDS);

    for candidate in &candidates {
        if let Some(org) = match_known(candidate) {
            return OrgMatch {
                label: org.label.to_string(),
                key: org.key.to_string(),
            };
        }
    }

    if let Some(first) = candidates.first() {
        let key = clean_token(first);
        if !key.is_empty() {
            return OrgMatch {
                label: first.clone(),
                key,
            };
        }
    }

    OrgMatch {
        label: FALLBACK_ORG_LABEL.to_string(),
        key: FALLBACK_ORG_KEY.to_string(),
    }
}

/// Resolve a selection identifier (key or display label) to an org key.
///
/// Uses the same matching as record detection so that selecting "조선대학교"
/// or "chosun" both yield `chosun`. Returns `None` for blank input.
pub fn org_key_for_selection(selection: &str) -> Option<String> {
    let trimmed = selection.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(org) = KNOWN_ORGS.iter().find(|org| org.key == trimmed) {
        return Some(org.key.to_string());
    }
    if let Some(org) = match_known(trimmed) {
        return Some(org.key.to_string());
    }
    let key = clean_token(trimmed);
    (!key.is_empty()).then_some(key)
}

// ============================================================================
// IDENTITY
// ============================================================================

fn detect_vehicle_key(record: &Value) -> Option<String> {
    VEHICLE_KEY_FIELDS
        .iter()
        .filter_map(|alias| field(record, alias).and_then(as_text))
        .map(|text| clean_token(&text))
        .find(|key| !key.is_empty())
}

/// Choose the identity part for the canonical id.
///
/// Parts are ranked vehicle key → raw id → operator id → operator name and
/// the highest-ranked present part is used. A record that later drops a
/// lower-ranked field (e.g. `operatorId`) keeps its id.
fn identity_part(
    vehicle_key: Option<&str>,
    raw_id: Option<&str>,
    operator_id: Option<i64>,
    operator_name: Option<&str>,
) -> Option<String> {
    if let Some(key) = vehicle_key {
        return Some(key.to_string());
    }
    if let Some(id) = raw_id {
        return Some(id.to_string());
    }
    if let Some(op) = operator_id {
        return Some(format!("op{}", op));
    }
    operator_name
        .map(clean_token)
        .filter(|name| !name.is_empty())
}

fn position_token(lat: f64, lng: f64) -> Option<String> {
    // (0, 0) is what receivers without a fix report; it identifies nothing.
    if lat == 0.0 && lng == 0.0 {
        return None;
    }
    Some(format!("pos{:.5}_{:.5}", lat, lng))
}

fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
                return Some(dt.timestamp_millis());
            }
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(naive.and_utc().timestamp_millis());
            }
            trimmed.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64)
        }
        _ => None,
    }
}

/// Normalize one raw telemetry record.
///
/// Returns `None` when the coordinates are missing or not finite; such
/// records are dropped without further notice.
///
/// # Arguments
/// * `record` - The raw record (any JSON value; non-objects yield `None`)
/// * `now_ms` - Wall-clock fallback for records without a usable timestamp
/// * `random_token` - Last-resort id source, only called when no identity
///   field and no usable position exist
pub fn normalize(
    record: &Value,
    now_ms: i64,
    random_token: impl FnOnce() -> String,
) -> Option<NormalizedEntity> {
    if !record.is_object() {
        return None;
    }

    let lat = coalesce(record, LAT_FIELDS).and_then(as_number)?;
    let lng = coalesce(record, LNG_FIELDS).and_then(as_number)?;

    let org = detect_org(record);

    let vehicle_key = detect_vehicle_key(record);
    let raw_id = coalesce(record, RAW_ID_FIELDS)
        .and_then(as_text)
        .map(|id| clean_token(&id))
        .filter(|id| !id.is_empty());
    let operator_id = coalesce(record, OPERATOR_ID_FIELDS).and_then(as_integer);
    let operator_name = coalesce(record, OPERATOR_NAME_FIELDS).and_then(as_text);

    let (id, confidence) = match identity_part(
        vehicle_key.as_deref(),
        raw_id.as_deref(),
        operator_id,
        operator_name.as_deref(),
    ) {
        Some(part) => (format!("{}:{}", org.key, part), IdentityConfidence::Stable),
        None => match position_token(lat, lng) {
            Some(token) => (
                format!("{}:{}", org.key, token),
                IdentityConfidence::PositionDerived,
            ),
            None => (
                format!("{}:rnd{}", org.key, random_token()),
                IdentityConfidence::Random,
            ),
        },
    };

    let name = coalesce(record, NAME_FIELDS)
        .and_then(as_text)
        .unwrap_or_else(|| DEFAULT_ENTITY_NAME.to_string());

    let speed = coalesce(record, SPEED_FIELDS).and_then(as_number);

    let updated_at = coalesce(record, UPDATED_FIELDS)
        .and_then(parse_timestamp)
        .unwrap_or(now_ms);

    Some(NormalizedEntity {
        id,
        lat,
        lng,
        name,
        speed,
        updated_at,
        org_label: org.label,
        org_key: org.key,
        operator_id,
        operator_name,
        confidence,
    })
}

// ============================================================================
// TESTS
// ============================================================================
