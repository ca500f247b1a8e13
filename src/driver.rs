//! Block-driven dispute and settlement scheduling.
//!
//! [schedule] looks at one channel at one block height and decides what has
//! to happen on-chain. [Driver] wraps it with bookkeeping of calls that are
//! already in flight so a slow transaction is not submitted again every
//! block.

use std::collections::HashSet;

use tracing::debug;

use crate::{
    chain::{CallKind, ChainCall},
    channel::{ChannelLedger, ChannelState},
    config::Config,
    packed::types::Hash,
    transfer::plan_secret_registration,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Submit(ChainCall),
    /// The unlock window closed, these locks can no longer be claimed
    /// whatever their expiration.
    FailTransfers {
        channel_id: Hash,
        secret_hashes: Vec<Hash>,
    },
    /// Our withdraw request passed its deadline without a co-signature.
    ExpireWithdraw { channel_id: Hash },
}

/// Last block at which a registered lock can still be unlocked on-chain.
pub fn unlock_deadline(config: &Config, ledger: &ChannelLedger) -> Option<u64> {
    ledger
        .settle_block()
        .map(|settle| settle.saturating_add(config.punish_blocks))
}

/// Block by which a third party watching the channel for us has to submit
/// the partner's newest balance proof.
pub fn delegate_update_block(config: &Config, ledger: &ChannelLedger) -> Option<u64> {
    let settle_block = ledger.settle_block()?;
    let window = ledger.identity().settle_timeout / config.update_transfer_divisor.max(1);
    Some(settle_block.saturating_sub(window))
}

fn register_secrets(config: &Config, ledger: &ChannelLedger, block: u64, actions: &mut Vec<Action>) {
    let secrets = ledger.secrets_to_register(block, config.reveal_timeout);
    if secrets.is_empty() {
        return;
    }
    let plan = plan_secret_registration(&secrets, config.secret_registration_cap);
    if plan.register_on_chain.is_empty() {
        return;
    }
    if !plan.resolve_off_chain.is_empty() {
        debug!(
            channel = ?ledger.channel_id(),
            deferred = plan.resolve_off_chain.len(),
            "secret registration capped"
        );
    }
    actions.push(Action::Submit(ChainCall::RegisterSecret {
        secrets: plan.register_on_chain,
    }));
}

/// What `ledger` needs at `block`. Pure, the caller deduplicates.
pub fn schedule(config: &Config, ledger: &ChannelLedger, block: u64) -> Vec<Action> {
    let mut actions = Vec::new();
    match ledger.state() {
        ChannelState::Opened => {
            if let Some(pending) = ledger.pending_withdraw() {
                if block > pending.deadline {
                    actions.push(Action::ExpireWithdraw {
                        channel_id: ledger.channel_id(),
                    });
                }
            }
            register_secrets(config, ledger, block, &mut actions);
        }
        ChannelState::Closed => {
            let (Some(settle_block), Some(unlock_deadline)) =
                (ledger.settle_block(), unlock_deadline(config, ledger))
            else {
                return actions;
            };

            if block < settle_block {
                if let Ok(update) = ledger.update_transfer() {
                    actions.push(Action::Submit(update));
                }
            }

            let mut unlocks_pending = false;
            if block < unlock_deadline {
                register_secrets(config, ledger, block, &mut actions);
                for call in ledger.unlock_calls() {
                    if let ChainCall::Unlock { lock, .. } = &call {
                        if ledger.is_registered(&lock.secret_hash) {
                            unlocks_pending = true;
                            actions.push(Action::Submit(call));
                        }
                    }
                }
            } else {
                let secret_hashes: Vec<Hash> = ledger
                    .our()
                    .locks
                    .iter()
                    .chain(ledger.partner().locks.iter())
                    .map(|pending| pending.lock.secret_hash)
                    .collect();
                if !secret_hashes.is_empty() {
                    actions.push(Action::FailTransfers {
                        channel_id: ledger.channel_id(),
                        secret_hashes,
                    });
                }
            }

            if block >= settle_block && !unlocks_pending {
                if let Ok(settle) = ledger.settle(block) {
                    actions.push(Action::Submit(settle));
                }
            }
        }
        ChannelState::Pending | ChannelState::Settled => {}
    }
    actions
}

/// [schedule] over all channels, without resubmitting calls in flight.
#[derive(Debug)]
pub struct Driver {
    config: Config,
    in_flight: HashSet<(Hash, CallKind)>,
}

impl Driver {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            in_flight: HashSet::new(),
        }
    }

    /// Actions for every channel, paired with the channel they are for.
    pub fn on_block(&mut self, block: u64, channels: &[&ChannelLedger]) -> Vec<(Hash, Action)> {
        let mut actions = Vec::new();
        for ledger in channels {
            let channel_id = ledger.channel_id();
            for action in schedule(&self.config, ledger, block) {
                if let Action::Submit(call) = &action {
                    if !self.in_flight.insert((channel_id, call.kind())) {
                        continue;
                    }
                }
                debug!(channel = ?channel_id, block, ?action, "scheduled");
                actions.push((channel_id, action));
            }
        }
        actions
    }

    /// The call finished, successfully or not, and may be scheduled again.
    pub fn complete(&mut self, channel_id: Hash, kind: CallKind) {
        self.in_flight.remove(&(channel_id, kind));
    }

    pub fn is_in_flight(&self, channel_id: Hash, kind: CallKind) -> bool {
        self.in_flight.contains(&(channel_id, kind))
    }
}

#[cfg(test)]
mod tests;
