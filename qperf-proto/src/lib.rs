//! Framed binary output stream: interns every observable artifact
//! (strings, locations, attributes) to a dense 32-bit id, emitting a
//! definition frame the first time each is seen and a reference
//! thereafter.

mod error;
mod intern;
mod message;
mod writer;

pub use error::{Error, Result};
pub use intern::{AttributeKey, AttributeTable, LocationKey, LocationTable, StringTable, SymbolGate};
pub use message::{ErrorCode, MessageTag};
pub use writer::{Features, StreamWriter, MAGIC, WIRE_VERSION};
