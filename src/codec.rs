//! Canonical encodings of everything a participant signs.
//!
//! Each payload is a plain struct whose field order is the byte order the
//! settlement contract hashes; the [packed][crate::packed] serializer turns
//! it into bytes. The channel binding (channel id, open block, chain id) is
//! always the trailing part, so a signature can never be replayed on another
//! channel, a reopened channel or another chain. The token network address
//! is deliberately not part of any payload.

use serde::Serialize;

use crate::{
    packed::{
        self,
        types::{Address, Hash, Signature, U256},
    },
    sig::{self, recover_signer, Signer},
};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("could not encode payload: {0}")]
    Encoding(#[from] packed::Error),
    #[error("could not recover signer: {0}")]
    Recovery(sig::Error),
    #[error("signature recovers to {recovered}, expected {expected}")]
    InvalidSignature { expected: Address, recovered: Address },
}

impl From<sig::Error> for CodecError {
    fn from(e: sig::Error) -> Self {
        Self::Recovery(e)
    }
}

/// Identifies one incarnation of a channel on one chain.
#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ChannelBinding {
    pub channel_id: Hash,
    pub open_block: u64,
    pub chain_id: U256,
}

/// A payload with a fixed packed encoding that gets signed as
/// `keccak256(encode())`.
pub trait SignedPayload: Serialize {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(packed::to_bytes(self)?)
    }

    fn digest(&self) -> Result<Hash, CodecError> {
        Ok(packed::to_hash(self)?)
    }

    fn sign(&self, signer: &Signer) -> Result<Signature, CodecError> {
        Ok(signer.sign(self.digest()?)?)
    }

    fn recover(&self, sig: Signature) -> Result<Address, CodecError> {
        Ok(recover_signer(self.digest()?, sig)?)
    }

    /// `Ok(false)` if the signature is well formed but made by someone else.
    fn verify(&self, sig: Signature, expected: Address) -> Result<bool, CodecError> {
        Ok(self.recover(sig)? == expected)
    }

    fn ensure_signed_by(&self, sig: Signature, expected: Address) -> Result<(), CodecError> {
        let recovered = self.recover(sig)?;
        if recovered != expected {
            return Err(CodecError::InvalidSignature {
                expected,
                recovered,
            });
        }
        Ok(())
    }
}

/// Off-chain statement of what one participant has sent to the other.
///
/// Encoded as `transferred_amount(32) ‖ locks_root(32) ‖ nonce(8) ‖
/// additional_hash(32) ‖ channel_id(32) ‖ open_block(8) ‖ chain_id(32)`.
#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct BalanceProof {
    pub transferred_amount: U256,
    pub locks_root: Hash,
    pub nonce: u64,
    pub additional_hash: Hash,
    pub binding: ChannelBinding,
}

impl SignedPayload for BalanceProof {}

impl BalanceProof {
    pub const ENCODED_LEN: usize = 32 + 32 + 8 + 32 + 32 + 8 + 32;

    pub fn balance_data(&self) -> BalanceData {
        BalanceData {
            locks_root: self.locks_root,
            transferred_amount: self.transferred_amount,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SignedBalanceProof {
    pub proof: BalanceProof,
    pub signature: Signature,
}

impl SignedBalanceProof {
    pub fn new(proof: BalanceProof, signer: &Signer) -> Result<Self, CodecError> {
        let signature = proof.sign(signer)?;
        Ok(Self { proof, signature })
    }

    pub fn signer(&self) -> Result<Address, CodecError> {
        self.proof.recover(self.signature)
    }

    pub fn ensure_signed_by(&self, expected: Address) -> Result<(), CodecError> {
        self.proof.ensure_signed_by(self.signature, expected)
    }
}

/// What the contract stores per participant after close/update:
/// `keccak256(locks_root ‖ transferred_amount)`.
#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct BalanceData {
    pub locks_root: Hash,
    pub transferred_amount: U256,
}

impl BalanceData {
    pub fn hash(&self) -> Result<Hash, CodecError> {
        Ok(packed::to_hash(self)?)
    }
}

/// Half of a withdraw authorization, signed by the participant that
/// withdraws (`participant1`).
#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Withdraw1 {
    pub participant1: Address,
    pub deposit1: U256,
    pub participant2: Address,
    pub deposit2: U256,
    pub withdraw1: U256,
    pub binding: ChannelBinding,
}

impl SignedPayload for Withdraw1 {}

/// The partner's half. Carries the partner's own withdraw amount, usually
/// zero.
#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Withdraw2 {
    pub participant1: Address,
    pub deposit1: U256,
    pub participant2: Address,
    pub deposit2: U256,
    pub withdraw1: U256,
    pub withdraw2: U256,
    pub binding: ChannelBinding,
}

impl SignedPayload for Withdraw2 {}

impl Withdraw1 {
    pub fn with_partner_withdraw(&self, withdraw2: U256) -> Withdraw2 {
        Withdraw2 {
            participant1: self.participant1,
            deposit1: self.deposit1,
            participant2: self.participant2,
            deposit2: self.deposit2,
            withdraw1: self.withdraw1,
            withdraw2,
            binding: self.binding,
        }
    }
}

impl Withdraw2 {
    pub fn first_half(&self) -> Withdraw1 {
        Withdraw1 {
            participant1: self.participant1,
            deposit1: self.deposit1,
            participant2: self.participant2,
            deposit2: self.deposit2,
            withdraw1: self.withdraw1,
            binding: self.binding,
        }
    }
}

/// Final balances both participants agree on. Each signs the whole tuple.
#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct CooperativeSettle {
    pub participant1: Address,
    pub balance1: U256,
    pub participant2: Address,
    pub balance2: U256,
    pub binding: ChannelBinding,
}

impl SignedPayload for CooperativeSettle {}

/// Lets `agent` unlock a lock on the signer's behalf after close.
#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct UnlockDelegate {
    pub agent: Address,
    /// The contract reads the expiration as a 32-byte word.
    pub expiration: U256,
    pub amount: U256,
    pub secret_hash: Hash,
    pub binding: ChannelBinding,
}

impl SignedPayload for UnlockDelegate {}

/// A signed [UnlockDelegate] together with the merkle proof it relies on.
/// The proof is opaque to the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockDelegateRequest {
    pub delegate: UnlockDelegate,
    pub proof: Vec<u8>,
    pub signature: Signature,
}

/// Allows a third party to submit the partner's balance proof after the
/// partner closed. Signed by the non-closing participant over the balance
/// proof followed by the closing participant's signature on it.
#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct BalanceProofUpdate {
    pub proof: BalanceProof,
    pub closing_signature: Signature,
}

impl SignedPayload for BalanceProofUpdate {}

impl From<SignedBalanceProof> for BalanceProofUpdate {
    fn from(signed: SignedBalanceProof) -> Self {
        Self {
            proof: signed.proof,
            closing_signature: signed.signature,
        }
    }
}
