//! Core of an off-chain payment-channel node.
//!
//! Two participants open a channel on a settlement contract, exchange signed
//! balance proofs off-chain and only go on-chain to deposit, withdraw, close,
//! settle or unlock hash-time-locked transfers. This crate holds the pieces
//! that have to be exactly right for that: the signed encodings
//! ([codec]), the lock tree ([locks]), the channel state machine
//! ([channel]), durable transfer progress ([transfer], [ack]) and the block
//! driven dispute logic ([driver]). [node::Node] ties them together on top of
//! host-provided ports for the chain, the network and storage.

mod packed {
    mod error;
    mod hashing;
    mod ser;

    pub mod types;

    pub use error::{Error, Result};
    pub use hashing::{keccak256, to_hash};
    pub use ser::{to_bytes, to_writer, Serializer, Writer};

    #[cfg(test)]
    pub mod tests;
}
pub mod sig;

pub mod ack;
pub mod chain;
pub mod channel;
pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod locks;
pub mod node;
pub mod storage;
pub mod transfer;
pub mod wire;

pub use config::Config;
pub use error::{Error, ErrorKind};
pub use node::{Node, Transport, TransportError};
pub use packed::types::{Address, Hash, Signature, U256};
pub use packed::{keccak256, Error as EncodingError};
