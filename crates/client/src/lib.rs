//! `limsml-client` — session client for the LIMSML web service.
//!
//! This crate provides:
//! - A [`Transport`] trait plus the SOAP/HTTP binding the service speaks.
//! - The action registry discovered at login and its validation contracts.
//! - The session [`Client`]: login handshake, validated dispatch of
//!   discovered actions, and best-effort logout.
//!
//! # Usage
//!
//! ```rust,ignore
//! use limsml_client::{Client, ClientConfig};
//! use limsml_protocol::Value;
//!
//! let client = Client::login(ClientConfig::default()).await?;
//!
//! // List the remote commands discovered at login.
//! for (key, action) in client.registry().iter() {
//!     println!("{}.{}", key.entity(), action.command);
//! }
//!
//! // Call one.
//! let response = client
//!     .dispatch("sample", "get", vec![("sample_id".into(), Value::from(42))])
//!     .await?;
//!
//! client.logout().await;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod transport;

// Re-exports for convenience.
pub use client::{Client, EntityTarget, LogoutOutcome, SessionState};
pub use config::ClientConfig;
pub use error::ClientError;
pub use registry::{ActionDefinition, ActionKey, ActionRegistry, GENERIC_ENTITY};
pub use transport::{SoapTransport, Transport, TransportError};
