pub mod connection;
pub mod instance;

pub use connection::PgConnection;
pub use instance::{EphemeralInstance, Role};
