// rkv-common - Shared RESP types and codec for the RespKV client
//
// This crate defines commands, reply values and the RESP2 wire codec.
// It performs no I/O.

pub mod command;
pub mod error;
pub mod resp;

// Re-export for convenience
pub use command::*;
pub use error::*;
pub use resp::*;
