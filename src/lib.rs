pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod optimizer;
pub mod oracle;
pub mod telemetry;

pub use error::MpcError;
