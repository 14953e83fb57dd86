//! [`backoffice_auth::AuthStore`] implementations.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryAuthStore;
pub use postgres::PgAuthStore;
