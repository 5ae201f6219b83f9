//! Error types for the arbitration core and their wire-code mapping.
//!
//! The reply envelope distinguishes three namespaces: client issues
//! (precondition violated, correct the request and retry), device-busy
//! (transient, retry later), and server issues (internal or driver fault).
//! The `errcode` methods below are the single place where typed errors map
//! onto those namespaces; the error display strings double as the
//! `errmessage` text and follow the wire protocol's established wording.

use thiserror::Error;

use keybox_proto::ErrCode;

use crate::types::SessionId;

// ============================================================================
// Binding Errors
// ============================================================================

/// Errors from binding a session to a device.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    /// The session already holds a device and must unbind first.
    #[error("should disconnect first")]
    AlreadyBound,

    /// The device is occupied by another session.
    #[error("device already used by another client")]
    DeviceBusy,

    /// No device with this identifier exists.
    #[error("no such device")]
    DeviceNotFound,

    /// The driver refused the connection.
    #[error("connect failed")]
    ConnectFailed,

    /// The originating session vanished mid-dispatch. Per-session serial
    /// delivery makes this unreachable unless the consistency invariant is
    /// broken, so it surfaces as a server error rather than being swallowed.
    #[error("internal error: no session state")]
    SessionGone,
}

impl BindError {
    /// Wire error-code namespace for this failure.
    pub fn errcode(&self) -> ErrCode {
        match self {
            BindError::AlreadyBound | BindError::DeviceNotFound => ErrCode::ClientIssue,
            BindError::DeviceBusy => ErrCode::DeviceBusy,
            BindError::ConnectFailed | BindError::SessionGone => ErrCode::ServerIssue,
        }
    }
}

/// Errors from releasing a binding.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UnbindError {
    /// The session's current binding does not match the named device
    /// (or the session holds no binding at all).
    #[error("should connect first")]
    NotBound,

    /// The originating session vanished mid-dispatch.
    #[error("internal error: no session state")]
    SessionGone,
}

impl UnbindError {
    /// Wire error-code namespace for this failure.
    pub fn errcode(&self) -> ErrCode {
        match self {
            UnbindError::NotBound => ErrCode::ClientIssue,
            UnbindError::SessionGone => ErrCode::ServerIssue,
        }
    }
}

// ============================================================================
// Session Lifecycle Errors
// ============================================================================

/// Session registration errors.
///
/// These indicate transport-layer bugs, not protocol errors: they are logged
/// by the dispatcher and never produce a client reply.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("{0} is already registered")]
    Duplicate(SessionId),

    #[error("{0} is not registered")]
    NotFound(SessionId),
}
