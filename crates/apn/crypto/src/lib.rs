//! APN Crypto Utilities
//!
//! Push certificate parsing, expiry inspection, and TLS client setup.

mod cert;
mod tls;

pub use cert::*;
pub use tls::*;
