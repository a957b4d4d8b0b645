use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

// Field ranges for synthetic snapshots
pub const VEHICLE_COUNT_RANGE: std::ops::Range<u32> = 10..60;
pub const AVG_SPEED_RANGE: std::ops::Range<u32> = 10..70;
pub const CONGESTION_RANGE: std::ops::Range<f64> = 0.0..10.0;
pub const LIGHT_COUNT_RANGE: std::ops::RangeInclusive<usize> = 3..=7;

// Signal state of one traffic light
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LightState {
    Red,
    Green,
    Yellow,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrafficLight {
    pub id: u32, // Zero-based position within the snapshot
    pub state: LightState,
}

// One traffic snapshot, serialized as a single JSON line.
// Field order here is the wire order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSnapshot {
    pub timestamp: i64,                    // Milliseconds since the Unix epoch
    pub vehicle_count: u32,                // 10..=59
    pub avg_speed: u32,                    // 10..=69
    pub congestion_level: f64,             // 0.0..10.0
    pub traffic_lights: Vec<TrafficLight>, // 3 to 7 entries
}

// Snapshot source shared across connection handlers. Every call draws a
// fresh record; nothing persists between calls, so concurrent requests
// never see correlated values.
pub struct SnapshotGenerator {
    rng: Mutex<StdRng>,
}

impl SnapshotGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    // Fixed seed, for deterministic tests
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn generate(&self) -> SimulationSnapshot {
        let timestamp = Utc::now().timestamp_millis();
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let vehicle_count = rng.gen_range(VEHICLE_COUNT_RANGE);
        let avg_speed = rng.gen_range(AVG_SPEED_RANGE);
        let congestion_level = rng.gen_range(CONGESTION_RANGE);

        let light_count = rng.gen_range(LIGHT_COUNT_RANGE);
        let traffic_lights = (0..light_count)
            .map(|i| TrafficLight {
                id: i as u32,
                state: random_light_state(&mut *rng),
            })
            .collect();

        SimulationSnapshot {
            timestamp,
            vehicle_count,
            avg_speed,
            congestion_level,
            traffic_lights,
        }
    }
}

impl Default for SnapshotGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn random_light_state<R: Rng>(rng: &mut R) -> LightState {
    match rng.gen_range(0..3) {
        0 => LightState::Red,
        1 => LightState::Green,
        _ => LightState::Yellow,
    }
}
