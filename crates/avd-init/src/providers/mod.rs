//! Cloud control-plane implementations

pub mod azure;

pub use azure::AzCli;
