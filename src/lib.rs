//! netmon - local network diagnostics over HTTP.
//!
//! Exposes external IP lookup, interface enumeration, traffic counters,
//! packet capture (via tcpdump) and reachability checks (via ping).

pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod utils;

pub use config::{AppState, Config};
pub use error::{AppError, DiagError};
