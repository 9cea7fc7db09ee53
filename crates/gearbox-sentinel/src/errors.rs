use thiserror::Error;

/// Problems detected before any network traffic: bad input or a config gap.
///
/// Commands report these to the user and return early instead of failing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SentinelError {
    #[error("Chain '{chain}' not supported. Available: {available}")]
    UnsupportedChain { chain: String, available: String },

    #[error("No CreditManagers known for {0}")]
    NoCreditManagers(String),

    #[error("invalid address '{input}': {reason}")]
    InvalidAddress { input: String, reason: String },
}

impl SentinelError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedChain { .. } => "unsupported_chain",
            Self::NoCreditManagers(_) => "no_credit_managers",
            Self::InvalidAddress { .. } => "invalid_address",
        }
    }
}
