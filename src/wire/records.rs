use std::collections::BTreeSet;

use super::{
    address, hash, optional_hash, u256, u256_bytes, BalanceProofMsg, ConversionError, LockMsg,
    WithdrawRequestMsg,
};
use crate::{
    channel::{ChannelEnd, ChannelIdentity, ChannelLedger, ChannelState, WithdrawRequest},
    codec::SignedBalanceProof,
    locks::{Lock, LockRegistry, PendingLock},
    transfer::{Phase, Role, TransferRecord},
};

#[derive(Clone, PartialEq, prost::Message)]
pub struct StoredLock {
    #[prost(message, optional, tag = "1")]
    pub lock: Option<LockMsg>,
    #[prost(bytes = "vec", tag = "2")]
    pub secret: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StoredEnd {
    #[prost(bytes = "vec", tag = "1")]
    pub address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub deposit: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub withdrawn: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub balance_proof: Option<BalanceProofMsg>,
    #[prost(message, repeated, tag = "5")]
    pub locks: Vec<StoredLock>,
    #[prost(uint64, tag = "6")]
    pub chain_nonce: u64,
}

/// One row of the `channel` bucket.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StoredChannel {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub participant1: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub participant2: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub token_network: Vec<u8>,
    #[prost(uint64, tag = "5")]
    pub open_block: u64,
    #[prost(uint64, tag = "6")]
    pub settle_timeout: u64,
    #[prost(bytes = "vec", tag = "7")]
    pub chain_id: Vec<u8>,
    #[prost(uint32, tag = "8")]
    pub state: u32,
    #[prost(message, optional, tag = "9")]
    pub our: Option<StoredEnd>,
    #[prost(message, optional, tag = "10")]
    pub partner: Option<StoredEnd>,
    #[prost(uint64, optional, tag = "11")]
    pub closed_block: Option<u64>,
    #[prost(bytes = "vec", tag = "12")]
    pub closing_participant: Vec<u8>,
    #[prost(uint64, optional, tag = "13")]
    pub settled_block: Option<u64>,
    #[prost(message, optional, tag = "14")]
    pub pending_withdraw: Option<WithdrawRequestMsg>,
    #[prost(bytes = "vec", repeated, tag = "15")]
    pub registered_secrets: Vec<Vec<u8>>,
    #[prost(message, optional, tag = "16")]
    pub partner_withdraw: Option<WithdrawRequestMsg>,
}

/// One row of the `transfer` and `transfer_archive` buckets.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StoredTransfer {
    #[prost(uint32, tag = "1")]
    pub role: u32,
    #[prost(uint32, tag = "2")]
    pub phase: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub payer_channel: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub payee_channel: Vec<u8>,
    #[prost(message, optional, tag = "5")]
    pub lock: Option<LockMsg>,
    #[prost(bytes = "vec", tag = "6")]
    pub secret: Vec<u8>,
    #[prost(bytes = "vec", tag = "7")]
    pub initiator: Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    pub target: Vec<u8>,
    #[prost(uint64, tag = "9")]
    pub reveal_timeout: u64,
}

/// One row of the `ack` bucket: the answer to a processed message and the
/// messages it caused us to send back.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StoredAck {
    #[prost(bytes = "vec", tag = "1")]
    pub response: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub replies: Vec<Vec<u8>>,
}

impl From<&PendingLock> for StoredLock {
    fn from(value: &PendingLock) -> Self {
        Self {
            lock: Some(value.lock.into()),
            secret: value.secret.map(|s| s.0.to_vec()).unwrap_or_default(),
        }
    }
}

impl TryFrom<StoredLock> for PendingLock {
    type Error = ConversionError;

    fn try_from(value: StoredLock) -> Result<Self, Self::Error> {
        Ok(Self {
            lock: value
                .lock
                .ok_or(ConversionError::ExpectedSome("lock"))?
                .try_into()?,
            secret: optional_hash("secret", &value.secret)?,
        })
    }
}

impl From<&ChannelEnd> for StoredEnd {
    fn from(value: &ChannelEnd) -> Self {
        Self {
            address: value.address.0.to_vec(),
            deposit: u256_bytes(value.deposit),
            withdrawn: u256_bytes(value.withdrawn),
            balance_proof: value.balance_proof.map(Into::into),
            locks: value.locks.iter().map(Into::into).collect(),
            chain_nonce: value.chain_nonce,
        }
    }
}

impl TryFrom<StoredEnd> for ChannelEnd {
    type Error = ConversionError;

    fn try_from(value: StoredEnd) -> Result<Self, Self::Error> {
        let locks = value
            .locks
            .into_iter()
            .map(PendingLock::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            address: address("address", &value.address)?,
            deposit: u256("deposit", &value.deposit)?,
            withdrawn: u256("withdrawn", &value.withdrawn)?,
            balance_proof: value
                .balance_proof
                .map(SignedBalanceProof::try_from)
                .transpose()?,
            locks: LockRegistry::restore(locks),
            chain_nonce: value.chain_nonce,
        })
    }
}

impl From<&ChannelLedger> for StoredChannel {
    fn from(value: &ChannelLedger) -> Self {
        let id = &value.identity;
        Self {
            channel_id: id.channel_id.0.to_vec(),
            participant1: id.participant1.0.to_vec(),
            participant2: id.participant2.0.to_vec(),
            token_network: id.token_network.0.to_vec(),
            open_block: id.open_block,
            settle_timeout: id.settle_timeout,
            chain_id: u256_bytes(id.chain_id),
            state: value.state.into(),
            our: Some((&value.our).into()),
            partner: Some((&value.partner).into()),
            closed_block: value.closed_block,
            closing_participant: value
                .closing_participant
                .map(|a| a.0.to_vec())
                .unwrap_or_default(),
            settled_block: value.settled_block,
            pending_withdraw: value.pending_withdraw.map(Into::into),
            registered_secrets: value
                .registered_secrets
                .iter()
                .map(|h| h.0.to_vec())
                .collect(),
            partner_withdraw: value.partner_withdraw.map(Into::into),
        }
    }
}

impl TryFrom<StoredChannel> for ChannelLedger {
    type Error = ConversionError;

    fn try_from(value: StoredChannel) -> Result<Self, Self::Error> {
        let closing_participant = if value.closing_participant.is_empty() {
            None
        } else {
            Some(address("closing_participant", &value.closing_participant)?)
        };
        let registered_secrets = value
            .registered_secrets
            .iter()
            .map(|h| hash("registered_secrets", h))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self {
            identity: ChannelIdentity {
                channel_id: hash("channel_id", &value.channel_id)?,
                participant1: address("participant1", &value.participant1)?,
                participant2: address("participant2", &value.participant2)?,
                token_network: address("token_network", &value.token_network)?,
                open_block: value.open_block,
                settle_timeout: value.settle_timeout,
                chain_id: u256("chain_id", &value.chain_id)?,
            },
            state: ChannelState::try_from(value.state)
                .map_err(|v| ConversionError::UnknownValue("state", v))?,
            our: value
                .our
                .ok_or(ConversionError::ExpectedSome("our"))?
                .try_into()?,
            partner: value
                .partner
                .ok_or(ConversionError::ExpectedSome("partner"))?
                .try_into()?,
            closed_block: value.closed_block,
            closing_participant,
            settled_block: value.settled_block,
            pending_withdraw: value
                .pending_withdraw
                .map(WithdrawRequest::try_from)
                .transpose()?,
            partner_withdraw: value
                .partner_withdraw
                .map(WithdrawRequest::try_from)
                .transpose()?,
            registered_secrets,
        })
    }
}

impl From<&TransferRecord> for StoredTransfer {
    fn from(value: &TransferRecord) -> Self {
        Self {
            role: value.role.into(),
            phase: value.phase.into(),
            payer_channel: value.payer_channel.map(|h| h.0.to_vec()).unwrap_or_default(),
            payee_channel: value.payee_channel.map(|h| h.0.to_vec()).unwrap_or_default(),
            lock: Some(value.lock.into()),
            secret: value.secret.map(|s| s.0.to_vec()).unwrap_or_default(),
            initiator: value.initiator.0.to_vec(),
            target: value.target.0.to_vec(),
            reveal_timeout: value.reveal_timeout,
        }
    }
}

impl TryFrom<StoredTransfer> for TransferRecord {
    type Error = ConversionError;

    fn try_from(value: StoredTransfer) -> Result<Self, Self::Error> {
        let lock: Lock = value
            .lock
            .ok_or(ConversionError::ExpectedSome("lock"))?
            .try_into()?;
        Ok(Self {
            secret_hash: lock.secret_hash,
            role: Role::try_from(value.role).map_err(|v| ConversionError::UnknownValue("role", v))?,
            phase: Phase::try_from(value.phase)
                .map_err(|v| ConversionError::UnknownValue("phase", v))?,
            payer_channel: optional_hash("payer_channel", &value.payer_channel)?,
            payee_channel: optional_hash("payee_channel", &value.payee_channel)?,
            lock,
            secret: optional_hash("secret", &value.secret)?,
            initiator: address("initiator", &value.initiator)?,
            target: address("target", &value.target)?,
            reveal_timeout: value.reveal_timeout,
        })
    }
}
