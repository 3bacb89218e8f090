//! Ground truth oracle for simulation.
//!
//! The FleetOracle maintains the "God's eye view" of the fleet:
//! - True positions of all vehicles
//! - Kinematics (constant speed, slowly turning heading)
//! - Telemetry generation with GPS noise, dropped records and the aliased,
//!   inconsistent field names real feeds deliver

use fleetview_env::LatLng;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Meters per degree of latitude.
const METERS_PER_DEG: f64 = 111_320.0;

/// Field-naming convention used for one telemetry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AliasStyle {
    /// `busId`, `lat`/`lng`, `org`, `operatorId`
    Canonical,
    /// `vehicleId`, `latitude`/`longitude`, Korean organization label
    Verbose,
    /// `plateNumber`, nested `gps` and `telemetry` objects
    Nested,
    /// Everything numeric sent as strings
    Stringly,
}

impl AliasStyle {
    pub const ALL: [AliasStyle; 4] = [
        AliasStyle::Canonical,
        AliasStyle::Verbose,
        AliasStyle::Nested,
        AliasStyle::Stringly,
    ];
}

/// A ground truth vehicle in the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthVehicle {
    pub index: u64,
    pub bus_id: String,
    /// Organization key (`chosun`, `jang`, ...)
    pub org: String,
    pub operator_id: i64,
    pub name: String,
    pub position: LatLng,
    pub heading_rad: f64,
    pub turn_rate_rad_s: f64,
    pub speed_mps: f64,
    /// Vehicle is still reporting
    pub active: bool,
}

impl GroundTruthVehicle {
    /// Canonical id the engine is expected to resolve this vehicle to.
    pub fn expected_id(&self) -> String {
        format!("{}:{}", self.org, self.bus_id.to_lowercase())
    }
}

fn org_label(org: &str) -> &str {
    match org {
        "chosun" => "조선대학교",
        "jang" => "복지관",
        other => other,
    }
}

/// The Oracle - maintains ground truth and generates telemetry.
pub struct FleetOracle {
    rng: ChaCha8Rng,
    vehicles: Vec<GroundTruthVehicle>,
    current_time: f64,
    /// GPS noise standard deviation (meters)
    noise_m: f64,
    /// Probability that a vehicle's record is missing from a batch
    drop_probability: f64,
    /// Pick a random alias style per record instead of per vehicle
    alias_chaos: bool,
}

impl FleetOracle {
    /// Creates an oracle with the given physics seed.
    pub fn new(physics_seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(physics_seed),
            vehicles: Vec::new(),
            current_time: 0.0,
            noise_m: 4.0,
            drop_probability: 0.0,
            alias_chaos: false,
        }
    }

    pub fn set_noise(&mut self, noise_m: f64) {
        self.noise_m = noise_m.max(0.0);
    }

    pub fn set_drop_probability(&mut self, p: f64) {
        self.drop_probability = p.clamp(0.0, 1.0);
    }

    pub fn set_alias_chaos(&mut self, enabled: bool) {
        self.alias_chaos = enabled;
    }

    /// Spawns a vehicle near `origin` and returns its index.
    pub fn spawn_vehicle(&mut self, org: &str, operator_id: i64, origin: LatLng) -> u64 {
        let index = self.vehicles.len() as u64;
        let offset_m = 150.0 + 120.0 * index as f64;
        let bearing = index as f64 * 1.3;
        let position = offset(origin, offset_m * bearing.cos(), offset_m * bearing.sin());

        self.vehicles.push(GroundTruthVehicle {
            index,
            bus_id: format!("BUS{:02}", index + 1),
            org: org.to_string(),
            operator_id,
            name: format!("{}번 셔틀", index + 1),
            position,
            heading_rad: self.rng.gen_range(0.0..std::f64::consts::TAU),
            turn_rate_rad_s: self.rng.gen_range(-0.05..0.05),
            speed_mps: self.rng.gen_range(6.0..14.0),
            active: true,
        });
        index
    }

    /// Stops a vehicle from reporting.
    pub fn retire_vehicle(&mut self, index: u64) {
        if let Some(vehicle) = self.vehicles.get_mut(index as usize) {
            vehicle.active = false;
        }
    }

    /// Advances kinematics by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        for vehicle in self.vehicles.iter_mut().filter(|v| v.active) {
            vehicle.heading_rad += vehicle.turn_rate_rad_s * dt;
            let distance = vehicle.speed_mps * dt;
            vehicle.position = offset(
                vehicle.position,
                distance * vehicle.heading_rad.cos(),
                distance * vehicle.heading_rad.sin(),
            );
        }
    }

    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn vehicles(&self) -> &[GroundTruthVehicle] {
        &self.vehicles
    }

    pub fn active_vehicles(&self) -> Vec<&GroundTruthVehicle> {
        self.vehicles.iter().filter(|v| v.active).collect()
    }

    pub fn vehicle(&self, index: u64) -> Option<&GroundTruthVehicle> {
        self.vehicles.get(index as usize)
    }

    /// One telemetry batch: a noisy record per reporting vehicle.
    ///
    /// `now_ms` stamps the records (wall clock of the feed).
    pub fn telemetry_batch(&mut self, now_ms: i64) -> Vec<Value> {
        let normal = Normal::new(0.0, self.noise_m.max(f64::MIN_POSITIVE)).ok();
        let mut batch = Vec::new();

        for i in 0..self.vehicles.len() {
            if !self.vehicles[i].active {
                continue;
            }
            if self.drop_probability > 0.0 && self.rng.gen_bool(self.drop_probability) {
                continue;
            }
            let (north, east) = match &normal {
                Some(n) if self.noise_m > 0.0 => (n.sample(&mut self.rng), n.sample(&mut self.rng)),
                _ => (0.0, 0.0),
            };
            let style = if self.alias_chaos {
                AliasStyle::ALL[self.rng.gen_range(0..AliasStyle::ALL.len())]
            } else {
                AliasStyle::ALL[i % AliasStyle::ALL.len()]
            };

            let vehicle = &self.vehicles[i];
            let observed = offset(vehicle.position, north, east);
            batch.push(encode(vehicle, observed, style, now_ms));
        }
        batch
    }

    /// The batch as feed payload text.
    pub fn payload(&mut self, now_ms: i64) -> String {
        Value::Array(self.telemetry_batch(now_ms)).to_string()
    }
}

/// Moves `origin` by meters north/east.
pub fn offset(origin: LatLng, north_m: f64, east_m: f64) -> LatLng {
    let lat = origin.lat + north_m / METERS_PER_DEG;
    let lng = origin.lng + east_m / (METERS_PER_DEG * origin.lat.to_radians().cos());
    LatLng::new(lat, lng)
}

fn encode(vehicle: &GroundTruthVehicle, at: LatLng, style: AliasStyle, now_ms: i64) -> Value {
    let speed_kmh = vehicle.speed_mps * 3.6;
    match style {
        AliasStyle::Canonical => json!({
            "busId": vehicle.bus_id,
            "lat": at.lat,
            "lng": at.lng,
            "name": vehicle.name,
            "speed": speed_kmh,
            "updatedAt": now_ms,
            "org": vehicle.org,
            "operatorId": vehicle.operator_id,
        }),
        AliasStyle::Verbose => json!({
            "vehicleId": vehicle.bus_id,
            "latitude": at.lat,
            "longitude": at.lng,
            "routeName": vehicle.name,
            "velocity": speed_kmh,
            "timestamp": now_ms,
            "organization": org_label(&vehicle.org),
            "operator_id": vehicle.operator_id,
        }),
        AliasStyle::Nested => json!({
            "plateNumber": vehicle.bus_id,
            "gps": { "lat": at.lat, "lng": at.lng },
            "telemetry": { "speed": speed_kmh, "timestamp": now_ms },
            "affiliation": vehicle.org,
            "opId": vehicle.operator_id,
        }),
        AliasStyle::Stringly => json!({
            "busId": vehicle.bus_id,
            "lat": at.lat.to_string(),
            "lng": at.lng.to_string(),
            "busName": vehicle.name,
            "speedKm": format!("{:.1}", speed_kmh),
            "lastUpdated": now_ms.to_string(),
            "orgName": vehicle.org,
            "operatorId": vehicle.operator_id.to_string(),
        }),
    }
}
