pub mod auth;
pub mod health;
pub mod root;

pub use health::{HealthProbes, Probe};
