//! Signer using the secp256k1 crate (bindings to libsecp256k1).
//!
//! Produces byte-identical signatures to the k256 signer (both use RFC 6979
//! nonces), which the tests rely on.

use crate::packed::types::{Address, Hash, Signature};
use ::secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1, SecretKey,
};

use super::{address_from_uncompressed, V_OFFSET};

pub use ::secp256k1::Error;

impl From<PublicKey> for Address {
    fn from(pk: PublicKey) -> Self {
        address_from_uncompressed(&pk.serialize_uncompressed())
    }
}

pub struct Signer {
    secp: Secp256k1<All>,
    sk: SecretKey,
    addr: Address,
}

impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signer").field("addr", &self.addr).finish()
    }
}

impl Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        let secp = Secp256k1::new();
        let sk = SecretKey::new(rng);
        let addr = PublicKey::from_secret_key(&secp, &sk).into();
        Self { secp, sk, addr }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, Error> {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(bytes)?;
        let addr = PublicKey::from_secret_key(&secp, &sk).into();
        Ok(Self { secp, sk, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    /// Sign a digest using an Ethereum 65-byte recoverable signature.
    pub fn sign(&self, digest: Hash) -> Result<Signature, Error> {
        // We have to use sign_ecdsa_recoverable because the contract must be
        // able to recover the address. This gives us the additional
        // information needed for v.
        let msg = Message::from_slice(&digest.0)?;
        let sig = self.secp.sign_ecdsa_recoverable(&msg, &self.sk);
        let (v, rs) = sig.serialize_compact();

        // EIP-2 makes all signatures with a non-canonical s invalid. The
        // library produces canonical signatures already, fail early if that
        // changes at some point.
        debug_assert!(rs[32] & 0x80 == 0);

        let v = V_OFFSET + v.to_i32() as u8;
        Ok(Signature::new(&rs, v))
    }
}

pub fn recover_signer(digest: Hash, sig: Signature) -> Result<Address, Error> {
    let secp = Secp256k1::verification_only();
    let v = sig.0[64]
        .checked_sub(V_OFFSET)
        .ok_or(Error::InvalidRecoveryId)?;

    let recid = RecoveryId::from_i32(v.into())?;
    let sig = RecoverableSignature::from_compact(&sig.0[..64], recid)?;
    let msg = Message::from_slice(&digest.0)?;

    let pk = secp.recover_ecdsa(&msg, &sig)?;
    Ok(pk.into())
}
