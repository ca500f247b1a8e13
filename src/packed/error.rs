//! Error type and Return values used by the packed Serialization.

use serde::ser;
use thiserror::Error;

/// Represents all possible errors that can happen during Serialization.
#[derive(Debug, Error)]
pub enum Error {
    /// The struct contains a type that has no fixed-width packed
    /// representation.
    ///
    /// For example floating point numbers, strings, maps and enums carrying
    /// data. Signed payloads must be byte-exact on both ends of a channel and
    /// on-chain, so we never pick an implicit representation for those.
    /// Convert the value to one of the supported types (`u64`, [U256][super::types::U256],
    /// fixed-size bytes) before serializing.
    #[error("type is not representable in packed encoding: {0}")]
    TypeNotRepresentable(&'static str),
    /// Raised through [ser::Error::custom] by hand-written `Serialize` impls.
    #[error("{0}")]
    Custom(String),
}

impl ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: core::fmt::Display,
    {
        Error::Custom(msg.to_string())
    }
}

/// Alias for `Result` using the [Error] returned by the Serializer.
pub type Result<T> = core::result::Result<T, Error>;
