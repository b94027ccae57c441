//! Polargraph controller: kinematics, synchronized dual-stepper pulse
//! generation, an asynchronous job queue with a dedicated motion worker,
//! the device HTTP API, and the path-streaming supervisor.

pub mod config;
pub mod controller;
pub mod hardware;
pub mod motion;
pub mod state;
pub mod supervisor;
pub mod web;

pub use config::{Config, SupervisorConfig};
pub use controller::{Controller, ControllerError};
pub use state::MachineState;
