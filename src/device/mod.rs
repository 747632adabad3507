pub mod btle;
pub mod codec;
pub mod constants;
pub mod events;
pub mod fake;
pub mod liveness;
pub mod manager;
pub mod registry;
pub mod scan;
pub mod service;
pub mod shared;
pub mod transport;
pub mod types;
