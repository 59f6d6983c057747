//! Gateway close codes and the reconnect policy derived from them

use std::fmt;
use std::ops::RangeInclusive;

/// Close codes the gateway sends when it terminates a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    UnknownError = 4000,
    UnknownOpcode = 4001,
    DecodeError = 4002,
    /// A payload was sent before Identify
    NotAuthenticated = 4003,
    /// The token sent with Identify was rejected
    AuthenticationFailed = 4004,
    /// Identify was sent twice
    AlreadyAuthenticated = 4005,
    /// The sequence sent with Resume was invalid
    InvalidSequence = 4007,
    RateLimited = 4008,
    SessionTimedOut = 4009,
    InvalidShard = 4010,
    ShardingRequired = 4011,
    InvalidApiVersion = 4012,
    InvalidIntents = 4013,
    /// An intent the application is not approved for was requested
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Codes reserved for gateway-level closures
    pub const GATEWAY_RANGE: RangeInclusive<u16> = 4000..=4999;

    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimedOut),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error",
            Self::UnknownOpcode => "Unknown opcode",
            Self::DecodeError => "Decode error",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::InvalidSequence => "Invalid sequence",
            Self::RateLimited => "Rate limited",
            Self::SessionTimedOut => "Session timed out",
            Self::InvalidShard => "Invalid shard",
            Self::ShardingRequired => "Sharding required",
            Self::InvalidApiVersion => "Invalid API version",
            Self::InvalidIntents => "Invalid intents",
            Self::DisallowedIntents => "Disallowed intents",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_u16())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

/// What the connection does after the transport closes with a given code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Reconnect; `resume` is false when the saved session must be discarded
    Reconnect { resume: bool },
    /// Stop and surface the error; no reconnect
    Terminal,
    /// Code outside the gateway range; not classified by the gateway table
    NotGateway,
}

impl ClosePolicy {
    /// Classify a raw close code
    #[must_use]
    pub fn classify(code: u16) -> Self {
        if !CloseCode::GATEWAY_RANGE.contains(&code) {
            return Self::NotGateway;
        }

        match CloseCode::from_u16(code) {
            Some(
                CloseCode::UnknownError
                | CloseCode::UnknownOpcode
                | CloseCode::DecodeError
                | CloseCode::NotAuthenticated
                | CloseCode::AlreadyAuthenticated
                | CloseCode::SessionTimedOut,
            ) => Self::Reconnect { resume: true },
            Some(CloseCode::InvalidSequence) => Self::Reconnect { resume: false },
            // Bad version/intents/shard/credentials, rate limiting, and any
            // undefined code in range
            _ => Self::Terminal,
        }
    }

    #[must_use]
    pub const fn should_reconnect(self) -> bool {
        matches!(self, Self::Reconnect { .. })
    }
}

/// Human-readable reason for a raw close code
pub(crate) fn describe(code: u16) -> String {
    match CloseCode::from_u16(code) {
        Some(known) => known.to_string(),
        None => format!("Close code {code}"),
    }
}
