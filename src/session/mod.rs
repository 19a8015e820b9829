// Session Module
//
// Connections, statements and the registry of in-flight executors.

pub mod connection;
pub mod registry;
pub mod statement;

pub use connection::Connection;
pub use registry::{EntryInfo, RegistryEntry, SessionRegistry};
pub use statement::{Statement, StatementOptions};
