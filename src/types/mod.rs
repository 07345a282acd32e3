//! Core type definitions shared by the transports, the Argo CD client and the tools

pub mod application;
pub mod credentials;
pub mod jsonrpc;
pub mod session;

pub use application::*;
pub use credentials::*;
pub use session::*;
