pub mod billing;
pub mod channels;
pub mod config;
pub mod error;
pub mod relay;
pub mod tasks;
pub mod telemetry;

pub use error::{RelayError, RelayResult};
