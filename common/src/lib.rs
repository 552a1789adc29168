// Schedule handler library: publishes fired schedules, then deletes them and
// records them in a history topic once the broker confirms delivery

pub mod bootstrap;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod handler;
pub mod models;
pub mod queue;
pub mod telemetry;
pub mod trigger;
