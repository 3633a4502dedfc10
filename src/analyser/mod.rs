//! The core of TLS handshake correlation.
//! Match handshake records to TCP streams, resolve which side is the client, and measure
//! handshake latency and byte volume per stream.
pub mod utils;
pub mod core;
pub mod scan;
pub mod containers;
pub mod stats;
