pub mod config;
pub mod types;
pub mod codec;
pub mod oracle;
pub mod bridge;
pub mod custody;
pub mod ledger;
pub mod origin;
pub mod relayer;

pub use config::Config;
pub use types::{Address, BridgeMessage, ChainSelector, LedgerEvent, MessageDetail, MessageId, MessageStatus};
pub use ledger::LedgerStateMachine;
pub use origin::OriginRelay;

pub type Result<T> = std::result::Result<T, Error>;

/// 错误分类，对应协议层面的失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    Idempotency,
    Oracle,
    Accounting,
    Custody,
    Bridge,
    Input,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Unknown message: {0}")]
    UnknownMessage(MessageId),

    #[error("Already borrowed against message {0}")]
    AlreadyBorrowed(MessageId),

    #[error("Escrow for message {0} already released")]
    AlreadyReleased(MessageId),

    #[error("Collateral of message {0} is worth zero borrow units")]
    ZeroBorrow(MessageId),

    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Stale price: updated at {updated_at}, max age {max_age}s")]
    StalePrice { updated_at: u64, max_age: u64 },

    #[error("Invalid oracle price: {0}")]
    OraclePriceInvalid(String),

    #[error("Unknown price feed: {0}")]
    UnknownPriceFeed(Address),

    #[error("Repayment mismatch: expected {expected}, got {provided}")]
    RepaymentMismatch { expected: u128, provided: u128 },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u128, available: u128 },

    #[error("Insufficient allowance: required {required}, available {available}")]
    InsufficientAllowance { required: u128, available: u128 },

    #[error("Bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("Insufficient fee balance: required {required}, available {available}")]
    InsufficientFeeBalance { required: u128, available: u128 },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unauthorized(_) | Error::UnknownMessage(_) => ErrorKind::Authorization,
            Error::AlreadyBorrowed(_) | Error::AlreadyReleased(_) => ErrorKind::Idempotency,
            Error::OracleUnavailable(_)
            | Error::StalePrice { .. }
            | Error::OraclePriceInvalid(_)
            | Error::UnknownPriceFeed(_) => ErrorKind::Oracle,
            Error::RepaymentMismatch { .. } | Error::ZeroBorrow(_) | Error::ArithmeticOverflow(_) => {
                ErrorKind::Accounting
            }
            Error::InsufficientBalance { .. } | Error::InsufficientAllowance { .. } => ErrorKind::Custody,
            Error::BridgeUnavailable(_) | Error::InsufficientFeeBalance { .. } | Error::Network(_) => {
                ErrorKind::Bridge
            }
            Error::MalformedPayload(_) | Error::Config(_) => ErrorKind::Input,
            Error::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// 瞬时故障，重新投递可能成功
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::BridgeUnavailable(_) | Error::OracleUnavailable(_)
        )
    }
}
