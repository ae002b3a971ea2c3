#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod transport;

pub use transport::{ReqwestTransport, ReqwestTransportBuilder};

/// Re-export so users can configure the underlying client without a direct dependency.
pub use reqwest;
