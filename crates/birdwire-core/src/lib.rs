//! Core data model + decoding for the birdwire streaming API client.
//!
//! Payloads are decoded into immutable typed values. The raw JSON each value was
//! built from can be recovered through a [`raw_json::RawJsonScope`] without the
//! data types carrying any reference to it.

pub mod config;
pub mod control;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod parse;
pub mod raw_json;
pub mod user;

pub use control::{decode_control_message, ControlMessage, ControlMessageDecoder};
pub use errors::{Error, Result};
pub use raw_json::{RawJsonRegistry, RawJsonScope, ScopeGuard};
pub use user::{StreamUser, StreamUserResolver, UserResolver};
