pub mod client;
pub mod error;

pub use client::ArgocdClient;
pub use error::ArgocdError;
