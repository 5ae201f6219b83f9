//! Keybox Core - session-to-device arbitration for the keybox gateway.
//!
//! This crate implements:
//! - The session registry and the exclusive session<->device binding table,
//!   held together behind a single synchronization point
//! - Call dispatch for server-info, enumeration, bind/unbind, and forwarded
//!   methods
//! - The reply bridge that routes a device's asynchronous completion back to
//!   its originating session, or drops it if the session is gone
//! - Trait seams for the device driver, the device directory, and the
//!   outbound reply transport

#![forbid(unsafe_code)]

pub mod arbiter;
pub mod bridge;
pub mod device;
pub mod dispatch;
pub mod errors;
pub mod harness;
pub mod types;
