pub mod config;
pub mod ingest;
pub mod logging;
pub mod query;
pub mod server;
pub mod store;
pub mod types;
pub mod upstream;
