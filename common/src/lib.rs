//! # farm-node-common
//!
//! Platform independent part of the farm sensor node: it samples the
//! fitted sensors at a fixed interval and writes each reading to a
//! tree-structured cloud database.
//!
//! The hardware (sensor drivers, WiFi, the database client) is reached
//! through the traits in [`sensor`], [`connectivity`] and [`gateway`], so
//! the same loop runs on the device and in the host simulator.

pub mod config;
pub mod connectivity;
pub mod gateway;
pub mod memory;
pub mod orchestrator;
pub mod reading;
pub mod scheduler;
pub mod sensor;
pub mod time;

pub use config::NodeConfig;
pub use gateway::{NodePath, TreeStore, UploadGateway, UploadReport, WriteError};
pub use memory::MemoryTreeStore;
pub use orchestrator::SamplingOrchestrator;
pub use reading::{Group, GroupValue, SensorReading};
pub use scheduler::{CycleOutcome, CycleScheduler, CycleState, Schedule};
