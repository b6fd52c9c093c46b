//! Domain types shared by the routing, ingestion and command layers
//!
//! Topics double as entity identifiers: every device and sensor owns exactly one
//! topic (its API key), and the broker routes on that same string.

pub mod entities;
pub mod payload;
pub mod topics;

pub use entities::*;
pub use payload::*;
pub use topics::*;
