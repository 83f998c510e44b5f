//! Wire protocol for the node: topics, telemetry payloads and inbound commands
//!
//! Publish topic: `<namespace>/data/<project>/<thingName>`
//! Subscribe topic: `<namespace>/commands/<project>/<thingName>`

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
