//! Wire protocol for door sensor messages
//!
//! Every message is a single JSON object carrying a `timestamp` and a `kind`
//! discriminator. Topic names come from configuration and are checked here
//! before the agent starts.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
