//! Protobuf types for peer messages and persisted records, and their
//! conversions to and from the domain types.
//!
//! Fixed-width values travel as raw bytes: addresses 20, hashes 32,
//! signatures 65 and amounts as 32-byte big-endian integers.

mod records;

use prost::Message as _;

use crate::{
    channel::WithdrawRequest,
    codec::{BalanceProof, ChannelBinding, SignedBalanceProof, Withdraw1},
    locks::Lock,
    packed::types::{Address, Hash, Signature, U256},
};

pub use records::{StoredAck, StoredChannel, StoredEnd, StoredLock, StoredTransfer};

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("field {0} has the wrong byte length")]
    ByteLengthMismatch(&'static str),
    #[error("field {0} is missing")]
    ExpectedSome(&'static str),
    #[error("field {0} has unknown value {1}")]
    UnknownValue(&'static str, u32),
    #[error("could not decode protobuf: {0}")]
    Decode(#[from] prost::DecodeError),
}

pub(crate) fn hash(field: &'static str, bytes: &[u8]) -> Result<Hash, ConversionError> {
    Hash::from_slice(bytes).ok_or(ConversionError::ByteLengthMismatch(field))
}

/// Empty bytes stand for `None`.
pub(crate) fn optional_hash(
    field: &'static str,
    bytes: &[u8],
) -> Result<Option<Hash>, ConversionError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    hash(field, bytes).map(Some)
}

pub(crate) fn address(field: &'static str, bytes: &[u8]) -> Result<Address, ConversionError> {
    Address::from_slice(bytes).ok_or(ConversionError::ByteLengthMismatch(field))
}

pub(crate) fn signature(field: &'static str, bytes: &[u8]) -> Result<Signature, ConversionError> {
    Signature::from_slice(bytes).ok_or(ConversionError::ByteLengthMismatch(field))
}

pub(crate) fn u256(field: &'static str, bytes: &[u8]) -> Result<U256, ConversionError> {
    U256::from_be_slice(bytes).ok_or(ConversionError::ByteLengthMismatch(field))
}

pub(crate) fn u256_bytes(value: U256) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BalanceProofMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub transferred_amount: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub locks_root: Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub nonce: u64,
    #[prost(bytes = "vec", tag = "4")]
    pub additional_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub channel_id: Vec<u8>,
    #[prost(uint64, tag = "6")]
    pub open_block: u64,
    #[prost(bytes = "vec", tag = "7")]
    pub chain_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LockMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub secret_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub amount: Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub expiration: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DirectTransferMsg {
    #[prost(message, optional, tag = "1")]
    pub proof: Option<BalanceProofMsg>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LockedTransferMsg {
    #[prost(message, optional, tag = "1")]
    pub proof: Option<BalanceProofMsg>,
    #[prost(message, optional, tag = "2")]
    pub lock: Option<LockMsg>,
    #[prost(bytes = "vec", tag = "3")]
    pub initiator: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub target: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SecretRequestMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub secret_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub amount: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RevealSecretMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub secret: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UnlockMsg {
    #[prost(message, optional, tag = "1")]
    pub proof: Option<BalanceProofMsg>,
    #[prost(bytes = "vec", tag = "2")]
    pub secret: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RemoveExpiredLockMsg {
    #[prost(message, optional, tag = "1")]
    pub proof: Option<BalanceProofMsg>,
    #[prost(bytes = "vec", tag = "2")]
    pub secret_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WithdrawRequestMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub participant1: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub deposit1: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub participant2: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub deposit2: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub withdraw1: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub channel_id: Vec<u8>,
    #[prost(uint64, tag = "7")]
    pub open_block: u64,
    #[prost(bytes = "vec", tag = "8")]
    pub chain_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "9")]
    pub signature: Vec<u8>,
    #[prost(uint64, tag = "10")]
    pub deadline: u64,
}

/// Carries a co-signature: for withdraw responses and both directions of the
/// cooperative settle exchange.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ChannelSignatureMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AckMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub echo_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    #[prost(oneof = "envelope::Msg", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11")]
    pub msg: Option<envelope::Msg>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Msg {
        #[prost(message, tag = "1")]
        DirectTransfer(super::DirectTransferMsg),
        #[prost(message, tag = "2")]
        LockedTransfer(super::LockedTransferMsg),
        #[prost(message, tag = "3")]
        SecretRequest(super::SecretRequestMsg),
        #[prost(message, tag = "4")]
        RevealSecret(super::RevealSecretMsg),
        #[prost(message, tag = "5")]
        Unlock(super::UnlockMsg),
        #[prost(message, tag = "6")]
        RemoveExpiredLock(super::RemoveExpiredLockMsg),
        #[prost(message, tag = "7")]
        WithdrawRequest(super::WithdrawRequestMsg),
        #[prost(message, tag = "8")]
        WithdrawResponse(super::ChannelSignatureMsg),
        #[prost(message, tag = "9")]
        CooperativeSettleRequest(super::ChannelSignatureMsg),
        #[prost(message, tag = "10")]
        CooperativeSettleResponse(super::ChannelSignatureMsg),
        #[prost(message, tag = "11")]
        Ack(super::AckMsg),
    }
}

impl From<SignedBalanceProof> for BalanceProofMsg {
    fn from(value: SignedBalanceProof) -> Self {
        let proof = value.proof;
        Self {
            transferred_amount: u256_bytes(proof.transferred_amount),
            locks_root: proof.locks_root.0.to_vec(),
            nonce: proof.nonce,
            additional_hash: proof.additional_hash.0.to_vec(),
            channel_id: proof.binding.channel_id.0.to_vec(),
            open_block: proof.binding.open_block,
            chain_id: u256_bytes(proof.binding.chain_id),
            signature: value.signature.0.to_vec(),
        }
    }
}

impl TryFrom<BalanceProofMsg> for SignedBalanceProof {
    type Error = ConversionError;

    fn try_from(value: BalanceProofMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            proof: BalanceProof {
                transferred_amount: u256("transferred_amount", &value.transferred_amount)?,
                locks_root: hash("locks_root", &value.locks_root)?,
                nonce: value.nonce,
                additional_hash: hash("additional_hash", &value.additional_hash)?,
                binding: ChannelBinding {
                    channel_id: hash("channel_id", &value.channel_id)?,
                    open_block: value.open_block,
                    chain_id: u256("chain_id", &value.chain_id)?,
                },
            },
            signature: signature("signature", &value.signature)?,
        })
    }
}

impl From<Lock> for LockMsg {
    fn from(value: Lock) -> Self {
        Self {
            secret_hash: value.secret_hash.0.to_vec(),
            amount: u256_bytes(value.amount),
            expiration: value.expiration,
        }
    }
}

impl TryFrom<LockMsg> for Lock {
    type Error = ConversionError;

    fn try_from(value: LockMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            secret_hash: hash("secret_hash", &value.secret_hash)?,
            amount: u256("amount", &value.amount)?,
            expiration: value.expiration,
        })
    }
}

impl From<WithdrawRequest> for WithdrawRequestMsg {
    fn from(value: WithdrawRequest) -> Self {
        let p = value.payload;
        Self {
            participant1: p.participant1.0.to_vec(),
            deposit1: u256_bytes(p.deposit1),
            participant2: p.participant2.0.to_vec(),
            deposit2: u256_bytes(p.deposit2),
            withdraw1: u256_bytes(p.withdraw1),
            channel_id: p.binding.channel_id.0.to_vec(),
            open_block: p.binding.open_block,
            chain_id: u256_bytes(p.binding.chain_id),
            signature: value.signature.0.to_vec(),
            deadline: value.deadline,
        }
    }
}

impl TryFrom<WithdrawRequestMsg> for WithdrawRequest {
    type Error = ConversionError;

    fn try_from(value: WithdrawRequestMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            payload: Withdraw1 {
                participant1: address("participant1", &value.participant1)?,
                deposit1: u256("deposit1", &value.deposit1)?,
                participant2: address("participant2", &value.participant2)?,
                deposit2: u256("deposit2", &value.deposit2)?,
                withdraw1: u256("withdraw1", &value.withdraw1)?,
                binding: ChannelBinding {
                    channel_id: hash("channel_id", &value.channel_id)?,
                    open_block: value.open_block,
                    chain_id: u256("chain_id", &value.chain_id)?,
                },
            },
            signature: signature("signature", &value.signature)?,
            deadline: value.deadline,
        })
    }
}

fn proof_from(value: Option<BalanceProofMsg>) -> Result<SignedBalanceProof, ConversionError> {
    value.ok_or(ConversionError::ExpectedSome("proof"))?.try_into()
}

/// Messages exchanged between the two participants of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    DirectTransfer {
        proof: SignedBalanceProof,
    },
    LockedTransfer {
        proof: SignedBalanceProof,
        lock: Lock,
        initiator: Address,
        target: Address,
    },
    /// The target asks the initiator for the secret of a lock it received.
    SecretRequest {
        channel_id: Hash,
        secret_hash: Hash,
        amount: U256,
    },
    RevealSecret {
        channel_id: Hash,
        secret: Hash,
    },
    Unlock {
        proof: SignedBalanceProof,
        secret: Hash,
    },
    RemoveExpiredLock {
        proof: SignedBalanceProof,
        secret_hash: Hash,
    },
    WithdrawRequest(WithdrawRequest),
    WithdrawResponse {
        channel_id: Hash,
        signature: Signature,
    },
    CooperativeSettleRequest {
        channel_id: Hash,
        signature: Signature,
    },
    CooperativeSettleResponse {
        channel_id: Hash,
        signature: Signature,
    },
    /// Confirms processing of the message with this echo hash.
    Ack {
        echo_hash: Hash,
    },
}

impl Message {
    /// The channel this message belongs to, `None` for acks.
    pub fn channel_id(&self) -> Option<Hash> {
        match self {
            Message::DirectTransfer { proof }
            | Message::LockedTransfer { proof, .. }
            | Message::Unlock { proof, .. }
            | Message::RemoveExpiredLock { proof, .. } => Some(proof.proof.binding.channel_id),
            Message::SecretRequest { channel_id, .. }
            | Message::RevealSecret { channel_id, .. }
            | Message::WithdrawResponse { channel_id, .. }
            | Message::CooperativeSettleRequest { channel_id, .. }
            | Message::CooperativeSettleResponse { channel_id, .. } => Some(*channel_id),
            Message::WithdrawRequest(request) => Some(request.payload.binding.channel_id),
            Message::Ack { .. } => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        Envelope::from(self.clone()).encode_to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ConversionError> {
        Envelope::decode(bytes)?.try_into()
    }
}

impl From<Message> for Envelope {
    fn from(value: Message) -> Self {
        use envelope::Msg;

        let msg = match value {
            Message::DirectTransfer { proof } => Msg::DirectTransfer(DirectTransferMsg {
                proof: Some(proof.into()),
            }),
            Message::LockedTransfer {
                proof,
                lock,
                initiator,
                target,
            } => Msg::LockedTransfer(LockedTransferMsg {
                proof: Some(proof.into()),
                lock: Some(lock.into()),
                initiator: initiator.0.to_vec(),
                target: target.0.to_vec(),
            }),
            Message::SecretRequest {
                channel_id,
                secret_hash,
                amount,
            } => Msg::SecretRequest(SecretRequestMsg {
                channel_id: channel_id.0.to_vec(),
                secret_hash: secret_hash.0.to_vec(),
                amount: u256_bytes(amount),
            }),
            Message::RevealSecret { channel_id, secret } => Msg::RevealSecret(RevealSecretMsg {
                channel_id: channel_id.0.to_vec(),
                secret: secret.0.to_vec(),
            }),
            Message::Unlock { proof, secret } => Msg::Unlock(UnlockMsg {
                proof: Some(proof.into()),
                secret: secret.0.to_vec(),
            }),
            Message::RemoveExpiredLock { proof, secret_hash } => {
                Msg::RemoveExpiredLock(RemoveExpiredLockMsg {
                    proof: Some(proof.into()),
                    secret_hash: secret_hash.0.to_vec(),
                })
            }
            Message::WithdrawRequest(request) => Msg::WithdrawRequest(request.into()),
            Message::WithdrawResponse {
                channel_id,
                signature,
            } => Msg::WithdrawResponse(ChannelSignatureMsg {
                channel_id: channel_id.0.to_vec(),
                signature: signature.0.to_vec(),
            }),
            Message::CooperativeSettleRequest {
                channel_id,
                signature,
            } => Msg::CooperativeSettleRequest(ChannelSignatureMsg {
                channel_id: channel_id.0.to_vec(),
                signature: signature.0.to_vec(),
            }),
            Message::CooperativeSettleResponse {
                channel_id,
                signature,
            } => Msg::CooperativeSettleResponse(ChannelSignatureMsg {
                channel_id: channel_id.0.to_vec(),
                signature: signature.0.to_vec(),
            }),
            Message::Ack { echo_hash } => Msg::Ack(AckMsg {
                echo_hash: echo_hash.0.to_vec(),
            }),
        };
        Envelope { msg: Some(msg) }
    }
}

impl TryFrom<Envelope> for Message {
    type Error = ConversionError;

    fn try_from(value: Envelope) -> Result<Self, Self::Error> {
        use envelope::Msg;

        Ok(match value.msg.ok_or(ConversionError::ExpectedSome("msg"))? {
            Msg::DirectTransfer(m) => Message::DirectTransfer {
                proof: proof_from(m.proof)?,
            },
            Msg::LockedTransfer(m) => Message::LockedTransfer {
                proof: proof_from(m.proof)?,
                lock: m.lock.ok_or(ConversionError::ExpectedSome("lock"))?.try_into()?,
                initiator: address("initiator", &m.initiator)?,
                target: address("target", &m.target)?,
            },
            Msg::SecretRequest(m) => Message::SecretRequest {
                channel_id: hash("channel_id", &m.channel_id)?,
                secret_hash: hash("secret_hash", &m.secret_hash)?,
                amount: u256("amount", &m.amount)?,
            },
            Msg::RevealSecret(m) => Message::RevealSecret {
                channel_id: hash("channel_id", &m.channel_id)?,
                secret: hash("secret", &m.secret)?,
            },
            Msg::Unlock(m) => Message::Unlock {
                proof: proof_from(m.proof)?,
                secret: hash("secret", &m.secret)?,
            },
            Msg::RemoveExpiredLock(m) => Message::RemoveExpiredLock {
                proof: proof_from(m.proof)?,
                secret_hash: hash("secret_hash", &m.secret_hash)?,
            },
            Msg::WithdrawRequest(m) => Message::WithdrawRequest(m.try_into()?),
            Msg::WithdrawResponse(m) => Message::WithdrawResponse {
                channel_id: hash("channel_id", &m.channel_id)?,
                signature: signature("signature", &m.signature)?,
            },
            Msg::CooperativeSettleRequest(m) => Message::CooperativeSettleRequest {
                channel_id: hash("channel_id", &m.channel_id)?,
                signature: signature("signature", &m.signature)?,
            },
            Msg::CooperativeSettleResponse(m) => Message::CooperativeSettleResponse {
                channel_id: hash("channel_id", &m.channel_id)?,
                signature: signature("signature", &m.signature)?,
            },
            Msg::Ack(m) => Message::Ack {
                echo_hash: hash("echo_hash", &m.echo_hash)?,
            },
        })
    }
}

#[cfg(test)]
mod tests;
