//! Error-code namespaces for the reply envelope.

/// Error-code namespace carried in the `errcode` field of every reply.
///
/// Codes produced by the gateway itself come from these namespaces; codes
/// reported by a device on a forwarded call pass through the envelope
/// verbatim and are distinguished from gateway codes only by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrCode {
    /// Success.
    Ok = 0,
    /// Caller violated a precondition; retryable after correcting the
    /// request.
    ClientIssue = 1000,
    /// Target device is occupied by another session; retryable later.
    DeviceBusy = 2000,
    /// Internal or driver fault; not retryable without server-side
    /// intervention.
    ServerIssue = 3000,
}

impl ErrCode {
    /// Numeric wire value.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<ErrCode> for i32 {
    fn from(code: ErrCode) -> Self {
        code.code()
    }
}
