//! Typed parsing of the method names recognized by the gateway.

use std::fmt;

/// A forwarded operation: executed by the session's bound device and
/// completed asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardedMethod {
    GetPublicKeyFromPath,
    SignReq,
    MultiplyReq,
}

impl ForwardedMethod {
    /// Wire name of the method.
    pub fn as_str(self) -> &'static str {
        match self {
            ForwardedMethod::GetPublicKeyFromPath => "getPublicKeyFromPath",
            ForwardedMethod::SignReq => "signReq",
            ForwardedMethod::MultiplyReq => "multiplyReq",
        }
    }
}

/// Typed view of an incoming method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    GetServerVersion,
    GetDeviceList,
    ConnectDevice,
    DisconnectDevice,
    Forwarded(ForwardedMethod),
}

impl Method {
    /// Parse a wire method name. Unknown names return `None`; the
    /// dispatcher answers those with a client-issue reply.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "getServerVersion" => Some(Method::GetServerVersion),
            "getDeviceList" => Some(Method::GetDeviceList),
            "connectDevice" => Some(Method::ConnectDevice),
            "disconnectDevice" => Some(Method::DisconnectDevice),
            "getPublicKeyFromPath" => {
                Some(Method::Forwarded(ForwardedMethod::GetPublicKeyFromPath))
            }
            "signReq" => Some(Method::Forwarded(ForwardedMethod::SignReq)),
            "multiplyReq" => Some(Method::Forwarded(ForwardedMethod::MultiplyReq)),
            _ => None,
        }
    }

    /// Wire name of the method.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::GetServerVersion => "getServerVersion",
            Method::GetDeviceList => "getDeviceList",
            Method::ConnectDevice => "connectDevice",
            Method::DisconnectDevice => "disconnectDevice",
            Method::Forwarded(forwarded) => forwarded.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_recognized_name_round_trips() {
        for name in [
            "getServerVersion",
            "getDeviceList",
            "connectDevice",
            "disconnectDevice",
            "getPublicKeyFromPath",
            "signReq",
            "multiplyReq",
        ] {
            let method = Method::parse(name).expect(name);
            assert_eq!(method.as_str(), name);
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(Method::parse("selfDestruct"), None);
        assert_eq!(Method::parse(""), None);
        // Method names are case sensitive on the wire.
        assert_eq!(Method::parse("GetServerVersion"), None);
    }

    #[test]
    fn forwarded_methods_parse_as_forwarded() {
        assert!(matches!(
            Method::parse("signReq"),
            Some(Method::Forwarded(ForwardedMethod::SignReq))
        ));
    }
}
