//! Handles the creation and verification of recoverable secp256k1 signatures.
//!
//! Signatures are 65 bytes `r || s || v` with `v ∈ {27, 28}` over the
//! keccak256 digest of a packed payload. The digest is signed as is: the
//! settlement contract recovers signers with `ecrecover(keccak256(payload))`
//! and does not expect the `\x19Ethereum Signed Message` prefix.

use crate::packed::{self, types::Address};

mod k256;
#[cfg(feature = "secp256k1")]
mod secp256k1;

#[cfg(not(feature = "secp256k1"))]
pub use self::k256::{recover_signer, Error, Signer};
#[cfg(feature = "secp256k1")]
pub use self::secp256k1::{recover_signer, Error, Signer};

/// Offset added to the recovery id, kept for compatibility with `ecrecover`.
const V_OFFSET: u8 = 27;

/// Derive the Ethereum address from an uncompressed SEC1 public key
/// (`0x04 || x || y`).
fn address_from_uncompressed(pk_bytes: &[u8]) -> Address {
    // Throw away the first byte, which is not part of the public key. It is
    // added by the SEC1 encoding.
    let hash = packed::keccak256(&[&pk_bytes[1..]]);

    let mut addr = Address([0; 20]);
    addr.0.copy_from_slice(&hash.0[32 - 20..]);
    addr
}

#[cfg(test)]
mod tests;
