//! Application-level error surface shared by the binary and the HTTP layer.

pub mod error;
