//! `limsml-protocol` — codec for the LIMSML XML-over-SOAP RPC protocol.
//!
//! This crate provides:
//! - The typed node tree model for protocol messages ([`node`]).
//! - The legacy keyed header cipher ([`crypto`]).
//! - The canonical XML codec ([`codec`]) over a generic attributed tree
//!   ([`xml`]).
//! - The response decoder ([`response`]): header parameters, per-command
//!   scalars, typed tabular datasets, file payloads, and nested error
//!   chains.
//!
//! The crate performs no I/O; the session client and transport live in
//! `limsml-client`.

pub mod codec;
pub mod crypto;
pub mod error;
pub mod node;
pub mod response;
pub mod xml;

// Re-exports for convenience.
pub use codec::Request;
pub use error::ProtocolError;
pub use node::{
    Action, ConnectionType, Entity, Field, Header, ResponseType, System, Transaction, Value,
};
pub use response::{CellValue, DataColumn, DataTable, Response, ResponseFile, MAX_BASE64_DECODE};
pub use xml::XmlNode;
