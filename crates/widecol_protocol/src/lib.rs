//! # widecol protocol
//!
//! Data model and wire messages for bulk row mutations against a
//! wide-column table.
//!
//! This crate provides:
//! - `Mutation`, `Entry` and `BulkMutation` for describing writes
//! - `StatusCode` and `Status` for per-entry and per-stream outcomes
//! - `MutateRowsRequest` / `MutateRowsResponse` wire messages
//! - CBOR encoding and length-prefixed framing
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
mod error;
mod messages;
mod mutation;
mod status;

pub use codec::{decode_cbor, encode_cbor, encode_frame, FrameDecoder, MAX_FRAME_LEN};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{MutateRowsRequest, MutateRowsResponse, OwnedMutateRowsRequest, ResponseEntry};
pub use mutation::{BulkMutation, CellTimestamp, Entry, Mutation, TimestampRange};
pub use status::{Status, StatusCode};
