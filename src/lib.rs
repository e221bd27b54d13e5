pub mod clock;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod lock;
pub mod model;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod store;
pub mod wal;
