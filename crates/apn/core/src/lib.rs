//! APN Core Types
//!
//! Notification model and binary codec for the legacy Apple Push
//! Notification gateway and feedback service.

mod codec;
mod notification;
mod payload;
mod status;
mod token;

pub use codec::*;
pub use notification::*;
pub use payload::*;
pub use status::*;
pub use token::*;
