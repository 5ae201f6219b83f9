//! Keybox Proto - wire format definitions for the keybox gateway protocol.
//!
//! The protocol is JSON-RPC shaped: each request carries
//! `(requestId, methodName, params)` and each reply carries the uniform
//! envelope `{errcode, errmessage, data}`. This crate defines:
//! - The identifier types crossing the wire (`DeviceId`, `RequestId`)
//! - The error-code namespaces produced by the gateway
//! - Typed parsing of the recognized method names
//! - The reply envelope and its constructors

#![forbid(unsafe_code)]

pub mod envelope;
pub mod errcode;
pub mod ids;
pub mod method;

pub use envelope::ReplyEnvelope;
pub use errcode::ErrCode;
pub use ids::{DeviceId, RequestId};
pub use method::{ForwardedMethod, Method};
