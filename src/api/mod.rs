//! API module
//!
//! This module provides the API functionality for fractal-focus: the axum
//! server and a reqwest client for it.

pub mod client;
pub mod server;

// Re-export commonly used types
pub use client::{Client, ClientConfig, ClientError};
pub use server::{router, serve, ServerConfig};
