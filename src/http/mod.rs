pub mod client;
pub mod dns_logging_connector;
pub mod traced_io;

pub use client::{ClientOptions, TracingClient};
