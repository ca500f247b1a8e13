//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).

use crate::packed::types::{Address, Hash, Signature};
use ::k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as k256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};

use super::{address_from_uncompressed, V_OFFSET};

pub use ::k256::ecdsa::Error;

impl From<VerifyingKey> for Address {
    fn from(key: VerifyingKey) -> Self {
        address_from_uncompressed(key.to_encoded_point(false).as_bytes())
    }
}

pub struct Signer {
    key: SigningKey,
    addr: Address,
}

// Never print key material.
impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signer").field("addr", &self.addr).finish()
    }
}

impl Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        let key = SigningKey::random(rng);
        let addr = key.verifying_key().into();
        Self { key, addr }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, Error> {
        let key = SigningKey::from_bytes(bytes)?;
        let addr = key.verifying_key().into();
        Ok(Self { key, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn sign(&self, digest: Hash) -> Result<Signature, Error> {
        let sig: recoverable::Signature = self.key.sign_prehash(&digest.0)?;

        // This Signature type already has the layout we need: 65 bytes
        // containing r, s and the recovery id in this order. We still have to
        // add 27 to v for `ecrecover`.
        let mut sig_bytes = [0u8; 65];
        sig_bytes.copy_from_slice(sig.as_bytes());
        debug_assert!(sig_bytes[32] & 0x80 == 0);
        sig_bytes[64] += V_OFFSET;

        Ok(Signature(sig_bytes))
    }
}

pub fn recover_signer(digest: Hash, sig: Signature) -> Result<Address, Error> {
    // Undo adding the 27, to go back to the format expected below
    let mut sig_bytes: [u8; 65] = sig.0;
    sig_bytes[64] = sig_bytes[64].checked_sub(V_OFFSET).ok_or_else(Error::new)?;

    let sig = recoverable::Signature::from_bytes(&sig_bytes)?;
    let verifying_key = sig.recover_verifying_key_from_digest_bytes(&digest.0.into())?;
    Ok(verifying_key.into())
}
