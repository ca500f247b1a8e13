//! Crate-level error and its coarse classification.

use crate::{
    chain::ChainError,
    channel::LedgerError,
    codec::CodecError,
    config::ConfigError,
    locks::LockError,
    node::TransportError,
    packed::types::Hash,
    storage::StorageError,
    transfer::TransferError,
    wire::ConversionError,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown channel {0}")]
    UnknownChannel(Hash),
    #[error("channel {0} already exists")]
    ChannelExists(Hash),
    #[error("channel {0} is halted after a persistence failure")]
    ChannelHalted(Hash),
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StorageError),
    #[error("unexpected message: {0}")]
    UnexpectedMessage(&'static str),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("malformed message: {0}")]
    Wire(#[from] ConversionError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What went wrong, independent of the layer that noticed it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidSignature,
    StaleNonce,
    UnknownChannel,
    InsufficientDeposit,
    InsufficientBalance,
    LockExpired,
    DuplicateLock,
    ChainCallTransient,
    ChainCallRejected,
    PersistenceFailure,
    ChannelHalted,
    InvalidTransition,
    /// Any other protocol rule the message or request broke.
    Rejected,
    Malformed,
    Config,
    Transport,
}

fn lock_kind(e: &LockError) -> ErrorKind {
    match e {
        LockError::DuplicateLock(_) => ErrorKind::DuplicateLock,
        LockError::LockExpired { .. } => ErrorKind::LockExpired,
        LockError::LockNotFound(_) => ErrorKind::Rejected,
        LockError::MalformedProof(_) => ErrorKind::Malformed,
    }
}

fn codec_kind(e: &CodecError) -> ErrorKind {
    match e {
        CodecError::InvalidSignature { .. } | CodecError::Recovery(_) => {
            ErrorKind::InvalidSignature
        }
        CodecError::Encoding(_) => ErrorKind::Malformed,
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownChannel(_) => ErrorKind::UnknownChannel,
            Error::ChannelExists(_) | Error::UnexpectedMessage(_) => ErrorKind::Rejected,
            Error::ChannelHalted(_) => ErrorKind::ChannelHalted,
            Error::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            Error::Ledger(e) => match e {
                LedgerError::InvalidSignature { .. } => ErrorKind::InvalidSignature,
                LedgerError::StaleNonce { .. } => ErrorKind::StaleNonce,
                LedgerError::InsufficientDeposit => ErrorKind::InsufficientDeposit,
                LedgerError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
                LedgerError::InvalidTransition { .. } | LedgerError::NotOpened(_) => {
                    ErrorKind::InvalidTransition
                }
                LedgerError::Lock(e) => lock_kind(e),
                LedgerError::Codec(e) => codec_kind(e),
                _ => ErrorKind::Rejected,
            },
            Error::Lock(e) => lock_kind(e),
            Error::Codec(e) => codec_kind(e),
            Error::Transfer(e) => match e {
                TransferError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
                TransferError::Storage(_) => ErrorKind::PersistenceFailure,
                TransferError::Corrupt(_) | TransferError::Decode(_) => ErrorKind::Malformed,
                _ => ErrorKind::Rejected,
            },
            Error::Wire(_) => ErrorKind::Malformed,
            Error::Chain(ChainError::Transient(_)) => ErrorKind::ChainCallTransient,
            Error::Chain(ChainError::Rejected(_)) => ErrorKind::ChainCallRejected,
            Error::Config(_) => ErrorKind::Config,
            Error::Transport(_) => ErrorKind::Transport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packed::types::Address;

    #[test]
    fn nested_errors_keep_their_kind() {
        let stale: Error = LedgerError::StaleNonce {
            current: 3,
            received: 2,
        }
        .into();
        assert_eq!(stale.kind(), ErrorKind::StaleNonce);

        let dup: Error = LedgerError::from(LockError::DuplicateLock(Hash::ZERO)).into();
        assert_eq!(dup.kind(), ErrorKind::DuplicateLock);

        let forged: Error = LedgerError::InvalidSignature {
            expected: Address([1; 20]),
            recovered: Address([2; 20]),
        }
        .into();
        assert_eq!(forged.kind(), ErrorKind::InvalidSignature);

        let transient: Error = ChainError::Transient("timeout".into()).into();
        assert_eq!(transient.kind(), ErrorKind::ChainCallTransient);

        let storage: Error = StorageError::Backend("disk full".into()).into();
        assert_eq!(storage.kind(), ErrorKind::PersistenceFailure);
    }
}
