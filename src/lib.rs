pub mod client;
pub mod server;
pub mod snapshot;

// Re-export commonly used types and functions for convenience
pub use client::{ClientError, ClientSession, SessionEvent, EVENT_CHANNEL_CAPACITY};
pub use server::{
    GridlockServer, ServerConfig, ServerError, DEFAULT_PORT, REQUEST_SIMULATION_DATA,
};
pub use snapshot::{LightState, SimulationSnapshot, SnapshotGenerator, TrafficLight};
