//! keyboxd - local gateway daemon for exclusive-access hardware security
//! devices.
//!
//! The arbitration core lives in `keybox-core`; this crate provides the
//! process shell around it: configuration, logging setup, and shutdown.

pub mod config;
