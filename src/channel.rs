//! Channel lifecycle: identity, per-participant ends and the [ChannelLedger]
//! state machine.

mod ledger;
mod withdraw;

use crate::{
    codec::{ChannelBinding, CodecError, SignedBalanceProof},
    locks::{LockError, LockRegistry},
    packed::{
        keccak256,
        types::{Address, Hash, U256},
    },
};

pub use ledger::{BalanceChange, ChannelLedger};
pub use withdraw::{PendingWithdraw, WithdrawAuthorization, WithdrawRequest};

/// Lifecycle of a channel. Transitions only move forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelState {
    Pending,
    Opened,
    Closed,
    Settled,
}

impl From<ChannelState> for u32 {
    fn from(state: ChannelState) -> Self {
        match state {
            ChannelState::Pending => 0,
            ChannelState::Opened => 1,
            ChannelState::Closed => 2,
            ChannelState::Settled => 3,
        }
    }
}

impl TryFrom<u32> for ChannelState {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChannelState::Pending),
            1 => Ok(ChannelState::Opened),
            2 => Ok(ChannelState::Closed),
            3 => Ok(ChannelState::Settled),
            other => Err(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("channel is {0:?}, expected it to be open")]
    NotOpened(ChannelState),
    #[error("{event} is not allowed in state {from:?}")]
    InvalidTransition {
        from: ChannelState,
        event: &'static str,
    },
    #[error("message is bound to another channel, open block or chain")]
    ChannelMismatch,
    #[error("signature recovers to {recovered}, expected {expected}")]
    InvalidSignature { expected: Address, recovered: Address },
    #[error("nonce {received} does not increase current nonce {current}")]
    StaleNonce { current: u64, received: u64 },
    #[error("transferred amount decreased from {current} to {received}")]
    TransferredAmountDecreased { current: U256, received: U256 },
    #[error("partner's transfers and locks exceed what the partner owns in the channel")]
    InsufficientDeposit,
    #[error("requested {requested}, only {available} available")]
    InsufficientBalance { available: U256, requested: U256 },
    #[error("locks root {received} does not match computed {expected}")]
    LocksRootMismatch { expected: Hash, received: Hash },
    #[error("expected amount {expected}, got {received}")]
    UnexpectedAmount { expected: U256, received: U256 },
    #[error("lock {secret_hash} expires at {expiration}, not expired yet")]
    LockNotExpired { secret_hash: Hash, expiration: u64 },
    #[error("{0} is not a participant of this channel")]
    UnknownParticipant(Address),
    #[error("signer {0} is not our participant")]
    WrongSigner(Address),
    #[error("cannot settle cooperatively while locks are pending")]
    PendingLocks,
    #[error("no newer balance proof to submit")]
    NothingToUpdate,
    #[error("settle is allowed from block {settle_block}, current block is {block}")]
    SettleTooEarly { settle_block: u64, block: u64 },
    #[error("a withdraw request is already pending")]
    WithdrawPending,
    #[error("no withdraw request is pending")]
    NoPendingWithdraw,
    #[error("withdraw request expired at block {deadline}, current block is {block}")]
    WithdrawExpired { deadline: u64, block: u64 },
    #[error("withdraw authorization lacks the signature of {0}")]
    MissingSignature(&'static str),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Codec(CodecError),
}

impl From<CodecError> for LedgerError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::InvalidSignature {
                expected,
                recovered,
            } => Self::InvalidSignature {
                expected,
                recovered,
            },
            other => Self::Codec(other),
        }
    }
}

/// Immutable facts about a channel, fixed when it is opened.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChannelIdentity {
    pub channel_id: Hash,
    /// The numerically lower address.
    pub participant1: Address,
    pub participant2: Address,
    pub token_network: Address,
    pub open_block: u64,
    pub settle_timeout: u64,
    pub chain_id: U256,
}

impl ChannelIdentity {
    pub fn new(
        a: Address,
        b: Address,
        token_network: Address,
        open_block: u64,
        settle_timeout: u64,
        chain_id: U256,
    ) -> Self {
        let (participant1, participant2) = if a <= b { (a, b) } else { (b, a) };
        Self {
            channel_id: Self::compute_id(participant1, participant2, token_network, open_block),
            participant1,
            participant2,
            token_network,
            open_block,
            settle_timeout,
            chain_id,
        }
    }

    /// `keccak256(lower ‖ higher ‖ token_network ‖ open_block(8))`.
    pub fn compute_id(a: Address, b: Address, token_network: Address, open_block: u64) -> Hash {
        let (lower, higher) = if a <= b { (a, b) } else { (b, a) };
        keccak256(&[
            &lower.0,
            &higher.0,
            &token_network.0,
            &open_block.to_be_bytes(),
        ])
    }

    pub fn binding(&self) -> ChannelBinding {
        ChannelBinding {
            channel_id: self.channel_id,
            open_block: self.open_block,
            chain_id: self.chain_id,
        }
    }

    pub fn partner_of(&self, participant: Address) -> Option<Address> {
        if participant == self.participant1 {
            Some(self.participant2)
        } else if participant == self.participant2 {
            Some(self.participant1)
        } else {
            None
        }
    }
}

/// One participant's side of the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEnd {
    pub address: Address,
    /// Total deposited on-chain.
    pub deposit: U256,
    /// Total withdrawn on-chain.
    pub withdrawn: U256,
    /// Latest accepted balance proof signed by this participant.
    pub balance_proof: Option<SignedBalanceProof>,
    /// Locks this participant has sent.
    pub locks: LockRegistry,
    /// Nonce of this participant's balance proof as recorded on-chain after
    /// close or update, 0 for none.
    pub chain_nonce: u64,
}

impl ChannelEnd {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            deposit: U256::zero(),
            withdrawn: U256::zero(),
            balance_proof: None,
            locks: LockRegistry::new(),
            chain_nonce: 0,
        }
    }

    pub fn nonce(&self) -> u64 {
        self.balance_proof.map_or(0, |bp| bp.proof.nonce)
    }

    pub fn transferred_amount(&self) -> U256 {
        self.balance_proof
            .map_or(U256::zero(), |bp| bp.proof.transferred_amount)
    }

    pub fn locks_root(&self) -> Hash {
        self.balance_proof.map_or(Hash::ZERO, |bp| bp.proof.locks_root)
    }

    /// Deposit still held by the contract for this participant.
    pub fn net_deposit(&self) -> U256 {
        self.deposit.saturating_sub(self.withdrawn)
    }
}
