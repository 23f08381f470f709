pub mod connection;
pub mod gateway;
pub mod memory;

pub use connection::{connect, connect_from_config, connect_with_settings, ping, DbPool};
pub use gateway::SqlxGateway;
pub use memory::InMemorySqlGateway;
