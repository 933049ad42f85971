//! Error taxonomy for the gateway core.
//!
//! Every variant names the action a caller takes on it in its doc comment;
//! see `connection.rs` for where each action is actually applied.

use thiserror::Error;

/// Reason an `AuthFailed` was produced, mirrors the LOGIN-NAK cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailReason {
    UnknownUser,
    BadPassword,
    Disabled,
    IPNotWhitelisted,
    Expired,
    MaxConnections,
    Banned,
}

impl std::fmt::Display for AuthFailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthFailReason::UnknownUser => "unknown user",
            AuthFailReason::BadPassword => "bad password",
            AuthFailReason::Disabled => "account disabled",
            AuthFailReason::IPNotWhitelisted => "ip not whitelisted",
            AuthFailReason::Expired => "account expired",
            AuthFailReason::MaxConnections => "max connections reached",
            AuthFailReason::Banned => "ip banned",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Outer length malformed, under/over protocol bounds, or inner payload
    /// length overruns. Close the connection.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    /// XOR checksum failed after decrypt. Close the connection.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A command requiring Authenticated state arrived in Fresh. Close the
    /// connection.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Reply LOGIN-NAK, record a ban event for UnknownUser/BadPassword, then
    /// close the connection.
    #[error("auth failed: {0}")]
    AuthFailed(AuthFailReason),

    /// ECM payload shape unrecognized. Reply empty-CW, keep connection open.
    #[error("ecm not supported")]
    EmuNotSupported,

    /// No key configured for this CAID. Reply empty-CW, keep connection open.
    #[error("ecm key not found")]
    EmuKeyNotFound,

    /// Decoded ECM failed its built-in checksum. Reply empty-CW, keep
    /// connection open.
    #[error("ecm checksum error")]
    EmuChecksumError,

    /// Outside the account's schedule window. Reply empty-CW, keep
    /// connection open.
    #[error("schedule denied")]
    ScheduleDenied,

    /// SID whitelist configured and SID absent. Reply empty-CW, keep
    /// connection open.
    #[error("sid not whitelisted")]
    SIDNotWhitelisted,

    /// CAID-hint not permitted for this account. Reply empty-CW, keep
    /// connection open.
    #[error("caid not permitted")]
    CAIDNotPermitted,

    /// Socket-level failure. Exit the dispatch loop and clean up.
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),

    /// Socket read/write exceeded its deadline. Exit the dispatch loop.
    #[error("timeout")]
    Timeout,

    /// Peer closed the connection. Exit the dispatch loop.
    #[error("disconnected")]
    Disconnect,

    /// CSPRNG produced fewer bytes than requested. Fatal for the operation;
    /// close the connection.
    #[error("insufficient entropy")]
    InsufficientEntropy,
}

impl GatewayError {
    /// Reply on the wire for ECM-path errors is indistinguishable across
    /// emulator failures and policy rejections — do not leak which one
    /// occurred.
    pub fn is_ecm_soft_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::EmuNotSupported
                | GatewayError::EmuKeyNotFound
                | GatewayError::EmuChecksumError
                | GatewayError::ScheduleDenied
                | GatewayError::SIDNotWhitelisted
                | GatewayError::CAIDNotPermitted
        )
    }

    /// Whether the connection's dispatch loop must exit after this error.
    pub fn is_fatal_to_connection(&self) -> bool {
        !self.is_ecm_soft_failure()
    }
}
