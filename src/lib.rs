pub mod cache;
pub mod conf;
pub mod docs;
pub mod error;
pub mod lookup;
pub mod scratch;
pub mod server;
pub mod stats;
pub mod tracing;
pub mod types;
