// Library root: exposes the node core for integration tests and the binary.
// The binary entry point is src/main.rs.

pub mod announcement;
pub mod comms;
pub mod config;
pub mod error;
pub mod identity;
pub mod logger;
pub mod mist;
pub mod signature;
pub mod supervisor;
