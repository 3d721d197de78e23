//! Structured logging setup, shared by the proxy, gateway binary and every
//! background loop instead of `println!`.

pub mod logger;

pub use logger::configure_logger;
