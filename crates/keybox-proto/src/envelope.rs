//! The uniform reply envelope returned for every request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errcode::ErrCode;

/// Reply payload sent back for every request: numeric error code
/// (0 = success), human-readable message, and a result value (`null` on
/// error).
///
/// The message text is informational; the error code is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub errcode: i32,
    pub errmessage: String,
    pub data: Value,
}

impl ReplyEnvelope {
    /// Success reply carrying a result payload.
    pub fn ok(data: Value) -> Self {
        Self {
            errcode: ErrCode::Ok.code(),
            errmessage: String::new(),
            data,
        }
    }

    /// Success reply with an informational message and no payload.
    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            errcode: ErrCode::Ok.code(),
            errmessage: message.into(),
            data: Value::Null,
        }
    }

    /// Gateway-originated error reply.
    pub fn err(code: ErrCode, message: impl Into<String>) -> Self {
        Self {
            errcode: code.code(),
            errmessage: message.into(),
            data: Value::Null,
        }
    }

    /// Envelope for a device-reported completion. The device is the
    /// authority on the code and message; both pass through verbatim.
    pub fn from_device(errcode: i32, errmessage: impl Into<String>, data: Value) -> Self {
        Self {
            errcode,
            errmessage: errmessage.into(),
            data,
        }
    }

    /// Whether this reply reports success.
    pub fn is_ok(&self) -> bool {
        self.errcode == ErrCode::Ok.code()
    }
}
