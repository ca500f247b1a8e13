//! The settlement contract as seen from a node: calls we submit, events we
//! observe, and the port the host implements to reach the chain.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::{
    codec::{BalanceData, CooperativeSettle, SignedBalanceProof, Withdraw2},
    config::RetryConfig,
    locks::{Lock, MerkleProof},
    packed::types::{Address, Hash, Signature, U256},
};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    /// Worth retrying: node unreachable, nonce races, gas price too low.
    #[error("transient chain error: {0}")]
    Transient(String),
    /// The contract refused the call. Retrying the same call is pointless.
    #[error("chain call rejected: {0}")]
    Rejected(String),
}

/// A transaction for the settlement contract or the secret registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainCall {
    Deposit {
        channel_id: Hash,
        participant: Address,
        total_deposit: U256,
    },
    /// Close with the partner's latest balance proof, if we have any.
    Close {
        channel_id: Hash,
        partner_proof: Option<SignedBalanceProof>,
    },
    /// Submit a newer balance proof of the closing participant.
    UpdateBalanceProof {
        channel_id: Hash,
        closing_participant: Address,
        proof: SignedBalanceProof,
    },
    Settle {
        channel_id: Hash,
        participant1: Address,
        data1: BalanceData,
        participant2: Address,
        data2: BalanceData,
    },
    CooperativeSettle {
        payload: CooperativeSettle,
        signature1: Signature,
        signature2: Signature,
    },
    Withdraw {
        payload: Withdraw2,
        signature1: Signature,
        signature2: Signature,
    },
    /// Claim a lock the partner sent us, whose secret is registered.
    Unlock {
        channel_id: Hash,
        sender: Address,
        lock: Lock,
        proof: MerkleProof,
    },
    RegisterSecret { secrets: Vec<Hash> },
}

/// Identifies a call for deduplication while it is in flight.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallKind {
    Deposit,
    Close,
    UpdateBalanceProof,
    Settle,
    CooperativeSettle,
    Withdraw,
    Unlock(Hash),
    RegisterSecret,
}

impl ChainCall {
    pub fn kind(&self) -> CallKind {
        match self {
            ChainCall::Deposit { .. } => CallKind::Deposit,
            ChainCall::Close { .. } => CallKind::Close,
            ChainCall::UpdateBalanceProof { .. } => CallKind::UpdateBalanceProof,
            ChainCall::Settle { .. } => CallKind::Settle,
            ChainCall::CooperativeSettle { .. } => CallKind::CooperativeSettle,
            ChainCall::Withdraw { .. } => CallKind::Withdraw,
            ChainCall::Unlock { lock, .. } => CallKind::Unlock(lock.secret_hash),
            ChainCall::RegisterSecret { .. } => CallKind::RegisterSecret,
        }
    }

    /// `None` for secret registration, which is not tied to a channel.
    pub fn channel_id(&self) -> Option<Hash> {
        match self {
            ChainCall::Deposit { channel_id, .. }
            | ChainCall::Close { channel_id, .. }
            | ChainCall::UpdateBalanceProof { channel_id, .. }
            | ChainCall::Settle { channel_id, .. }
            | ChainCall::Unlock { channel_id, .. } => Some(*channel_id),
            ChainCall::CooperativeSettle { payload, .. } => Some(payload.binding.channel_id),
            ChainCall::Withdraw { payload, .. } => Some(payload.binding.channel_id),
            ChainCall::RegisterSecret { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub block: u64,
}

/// Confirmed contract events for a channel, in the order they were mined.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    Opened {
        block: u64,
    },
    Deposited {
        participant: Address,
        total_deposit: U256,
    },
    Withdrawn {
        participant: Address,
        total_withdraw: U256,
    },
    Closed {
        closing_participant: Address,
        block: u64,
        /// Nonce of the balance proof the closer submitted, 0 for none.
        recorded_nonce: u64,
    },
    BalanceProofUpdated {
        closing_participant: Address,
        nonce: u64,
    },
    Settled {
        block: u64,
    },
    CooperativelySettled {
        block: u64,
    },
    SecretRegistered {
        secret: Hash,
        block: u64,
    },
    Unlocked {
        sender: Address,
        secret_hash: Hash,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParticipantSnapshot {
    pub address: Address,
    pub deposit: U256,
    pub withdrawn: U256,
}

/// The contract's view of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelSnapshot {
    pub channel_id: Hash,
    pub open_block: u64,
    pub settle_timeout: u64,
    pub closed_block: Option<u64>,
    pub closing_participant: Option<Address>,
    pub settled: bool,
    pub participants: [ParticipantSnapshot; 2],
}

/// Port to the chain, implemented by the host.
#[async_trait]
pub trait ChainService: Send + Sync {
    async fn submit(&self, call: ChainCall) -> Result<Receipt, ChainError>;

    async fn query_channel(&self, channel_id: Hash) -> Result<ChannelSnapshot, ChainError>;

    async fn current_block(&self) -> Result<u64, ChainError>;
}

/// Submit `call`, retrying transient failures with exponential backoff.
pub async fn submit_with_retry<C>(
    chain: &C,
    call: ChainCall,
    retry: &RetryConfig,
) -> Result<Receipt, ChainError>
where
    C: ChainService + ?Sized,
{
    let mut backoff = Duration::from_millis(retry.initial_backoff_ms);
    let max_backoff = Duration::from_millis(retry.max_backoff_ms);
    let mut attempt = 1;
    loop {
        match chain.submit(call.clone()).await {
            Err(ChainError::Transient(reason)) if attempt < retry.max_attempts => {
                warn!(
                    kind = ?call.kind(),
                    channel = ?call.channel_id(),
                    attempt,
                    %reason,
                    "chain call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Flaky {
        failures: Mutex<u32>,
        rejected: bool,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl ChainService for Flaky {
        async fn submit(&self, _call: ChainCall) -> Result<Receipt, ChainError> {
            *self.calls.lock().unwrap() += 1;
            if self.rejected {
                return Err(ChainError::Rejected("settle timeout not reached".into()));
            }
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ChainError::Transient("connection reset".into()));
            }
            Ok(Receipt {
                tx_hash: Hash([1; 32]),
                block: 10,
            })
        }

        async fn query_channel(&self, _: Hash) -> Result<ChannelSnapshot, ChainError> {
            Err(ChainError::Transient("unused".into()))
        }

        async fn current_block(&self) -> Result<u64, ChainError> {
            Ok(10)
        }
    }

    fn flaky(failures: u32, rejected: bool) -> Flaky {
        Flaky {
            failures: Mutex::new(failures),
            rejected,
            calls: Mutex::new(0),
        }
    }

    fn retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 10,
            max_backoff_ms: 40,
        }
    }

    fn call() -> ChainCall {
        ChainCall::RegisterSecret {
            secrets: vec![Hash([7; 32])],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let chain = flaky(2, false);
        let receipt = submit_with_retry(&chain, call(), &retry(5)).await.unwrap();
        assert_eq!(receipt.block, 10);
        assert_eq!(*chain.calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let chain = flaky(10, false);
        let err = submit_with_retry(&chain, call(), &retry(3)).await.unwrap_err();
        assert!(matches!(err, ChainError::Transient(_)));
        assert_eq!(*chain.calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_final() {
        let chain = flaky(0, true);
        let err = submit_with_retry(&chain, call(), &retry(5)).await.unwrap_err();
        assert!(matches!(err, ChainError::Rejected(_)));
        assert_eq!(*chain.calls.lock().unwrap(), 1);
    }

    #[test]
    fn call_kind_and_channel() {
        let c = ChainCall::Close {
            channel_id: Hash([3; 32]),
            partner_proof: None,
        };
        assert_eq!(c.kind(), CallKind::Close);
        assert_eq!(c.channel_id(), Some(Hash([3; 32])));
        assert_eq!(call().channel_id(), None);
    }
}
