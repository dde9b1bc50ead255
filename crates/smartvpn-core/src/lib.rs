//! `SmartVPN` Core Library
//!
//! Shared functionality for `SmartVPN` components:
//! - VPN protocol model and candidate port lists
//! - Configuration resolution and hierarchy
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{ProtocolCandidate, VpnProtocol};
