//! Infrastructure layer: stores, configuration, audit sink and seed data.

pub mod audit;
pub mod config;
pub mod seed;
pub mod store;

mod integration_tests;

pub use audit::TracingAuthEventSink;
pub use config::{AuthConfig, ConfigError};
pub use seed::{seed_demo_data, SeedReport};
pub use store::{InMemoryAuthStore, PgAuthStore};
