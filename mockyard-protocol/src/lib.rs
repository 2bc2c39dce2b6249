//! Wire types and HTTP client shared by the mockyard daemon and CLI.

pub mod client;
pub mod errors;
pub mod protocol;
