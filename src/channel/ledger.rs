use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::{
    ChannelEnd, ChannelIdentity, ChannelState, LedgerError, PendingWithdraw, WithdrawAuthorization,
    WithdrawRequest,
};
use crate::{
    chain::{ChainCall, ChainEvent},
    codec::{
        BalanceData, BalanceProof, BalanceProofUpdate, CooperativeSettle, SignedBalanceProof,
        SignedPayload, UnlockDelegate, UnlockDelegateRequest, Withdraw1,
    },
    locks::{self, Lock, LockError},
    packed::types::{Address, Hash, Signature, U256},
    sig::Signer,
};

/// How the locks and transferred amount of a balance proof relate to the
/// previous one of the same sender.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BalanceChange {
    /// Transferred amount grows, locks unchanged.
    Direct,
    /// A new lock, transferred amount unchanged.
    Lock(Lock),
    /// The lock of `secret` is removed and its amount added to the
    /// transferred amount.
    Unlock { secret: Hash },
    /// An expired lock is removed, transferred amount unchanged.
    Expire { secret_hash: Hash },
}

/// Off-chain view of one channel.
///
/// All mutating operations validate first and only then write, so a failed
/// operation leaves the ledger untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLedger {
    pub(crate) identity: ChannelIdentity,
    pub(crate) state: ChannelState,
    pub(crate) our: ChannelEnd,
    pub(crate) partner: ChannelEnd,
    pub(crate) closed_block: Option<u64>,
    pub(crate) closing_participant: Option<Address>,
    pub(crate) settled_block: Option<u64>,
    pub(crate) pending_withdraw: Option<PendingWithdraw>,
    /// The partner's withdraw we co-signed and have not seen on-chain.
    pub(crate) partner_withdraw: Option<WithdrawRequest>,
    /// Secret hashes whose secret is registered on-chain.
    pub(crate) registered_secrets: BTreeSet<Hash>,
}

impl ChannelLedger {
    pub fn new(identity: ChannelIdentity, our_address: Address) -> Result<Self, LedgerError> {
        let partner = identity
            .partner_of(our_address)
            .ok_or(LedgerError::UnknownParticipant(our_address))?;
        Ok(Self {
            identity,
            state: ChannelState::Pending,
            our: ChannelEnd::new(our_address),
            partner: ChannelEnd::new(partner),
            closed_block: None,
            closing_participant: None,
            settled_block: None,
            pending_withdraw: None,
            partner_withdraw: None,
            registered_secrets: BTreeSet::new(),
        })
    }

    pub fn identity(&self) -> &ChannelIdentity {
        &self.identity
    }

    pub fn channel_id(&self) -> Hash {
        self.identity.channel_id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn our(&self) -> &ChannelEnd {
        &self.our
    }

    pub fn partner(&self) -> &ChannelEnd {
        &self.partner
    }

    pub fn closed_block(&self) -> Option<u64> {
        self.closed_block
    }

    pub fn closing_participant(&self) -> Option<Address> {
        self.closing_participant
    }

    pub fn settled_block(&self) -> Option<u64> {
        self.settled_block
    }

    pub fn pending_withdraw(&self) -> Option<&PendingWithdraw> {
        self.pending_withdraw.as_ref()
    }

    pub fn partner_withdraw(&self) -> Option<&WithdrawRequest> {
        self.partner_withdraw.as_ref()
    }

    pub fn is_registered(&self, secret_hash: &Hash) -> bool {
        self.registered_secrets.contains(secret_hash)
    }

    /// First block at which settle is allowed.
    pub fn settle_block(&self) -> Option<u64> {
        self.closed_block
            .map(|closed| closed.saturating_add(self.identity.settle_timeout))
    }

    fn end(&self, participant: Address) -> Result<&ChannelEnd, LedgerError> {
        if participant == self.our.address {
            Ok(&self.our)
        } else if participant == self.partner.address {
            Ok(&self.partner)
        } else {
            Err(LedgerError::UnknownParticipant(participant))
        }
    }

    fn end_mut(&mut self, participant: Address) -> Result<&mut ChannelEnd, LedgerError> {
        if participant == self.our.address {
            Ok(&mut self.our)
        } else if participant == self.partner.address {
            Ok(&mut self.partner)
        } else {
            Err(LedgerError::UnknownParticipant(participant))
        }
    }

    fn counterpart(&self, participant: Address) -> &ChannelEnd {
        if participant == self.our.address {
            &self.partner
        } else {
            &self.our
        }
    }

    pub fn deposit(&self, participant: Address) -> Result<U256, LedgerError> {
        Ok(self.end(participant)?.deposit)
    }

    /// What `participant` would get if the channel settled now with all
    /// pending locks expiring: `deposit - withdrawn - sent + received`.
    pub fn balance(&self, participant: Address) -> Result<U256, LedgerError> {
        let end = self.end(participant)?;
        let other = self.counterpart(participant);
        Ok(end
            .net_deposit()
            .saturating_add(other.transferred_amount())
            .saturating_sub(end.transferred_amount()))
    }

    pub fn locked(&self, participant: Address) -> Result<U256, LedgerError> {
        Ok(self.end(participant)?.locks.locked_amount())
    }

    /// Amount `participant` signed a withdraw for that has not reached the
    /// chain yet.
    pub fn withdrawing(&self, participant: Address) -> Result<U256, LedgerError> {
        let request = if participant == self.our.address {
            self.pending_withdraw
        } else if participant == self.partner.address {
            self.partner_withdraw
        } else {
            return Err(LedgerError::UnknownParticipant(participant));
        };
        Ok(request.map_or_else(U256::zero, |r| r.payload.withdraw1))
    }

    /// Balance minus what is locked in pending transfers and what is about to
    /// be withdrawn.
    pub fn distributable(&self, participant: Address) -> Result<U256, LedgerError> {
        Ok(self
            .balance(participant)?
            .saturating_sub(self.locked(participant)?)
            .saturating_sub(self.withdrawing(participant)?))
    }

    fn ensure_opened(&self) -> Result<(), LedgerError> {
        match self.state {
            ChannelState::Opened => Ok(()),
            other => Err(LedgerError::NotOpened(other)),
        }
    }

    fn ensure_state(&self, expected: ChannelState, event: &'static str) -> Result<(), LedgerError> {
        if self.state != expected {
            return Err(LedgerError::InvalidTransition {
                from: self.state,
                event,
            });
        }
        Ok(())
    }

    fn ensure_our_signer(&self, signer: &Signer) -> Result<(), LedgerError> {
        if signer.address() != self.our.address {
            return Err(LedgerError::WrongSigner(signer.address()));
        }
        Ok(())
    }

    fn sign_next(
        &self,
        transferred_amount: U256,
        locks_root: Hash,
        additional_hash: Hash,
        signer: &Signer,
    ) -> Result<SignedBalanceProof, LedgerError> {
        let proof = BalanceProof {
            transferred_amount,
            locks_root,
            nonce: self.our.nonce() + 1,
            additional_hash,
            binding: self.identity.binding(),
        };
        Ok(SignedBalanceProof::new(proof, signer)?)
    }

    /// Send `amount` to the partner. Without a lock the transferred amount
    /// grows directly; with a lock (whose amount must be `amount`) the lock
    /// is added and only the locks root changes.
    pub fn apply_local_transfer(
        &mut self,
        amount: U256,
        lock: Option<Lock>,
        block: u64,
        signer: &Signer,
    ) -> Result<SignedBalanceProof, LedgerError> {
        self.ensure_opened()?;
        self.ensure_our_signer(signer)?;

        let available = self.distributable(self.our.address)?;
        if amount > available {
            return Err(LedgerError::InsufficientBalance {
                available,
                requested: amount,
            });
        }

        let mut registry = self.our.locks.clone();
        let (transferred, additional_hash) = match lock {
            None => (
                self.our.transferred_amount().saturating_add(amount),
                Hash::ZERO,
            ),
            Some(lock) => {
                if lock.amount != amount {
                    return Err(LedgerError::UnexpectedAmount {
                        expected: amount,
                        received: lock.amount,
                    });
                }
                registry.add_lock(lock, block)?;
                (self.our.transferred_amount(), lock.secret_hash)
            }
        };

        let signed = self.sign_next(transferred, registry.compute_root(), additional_hash, signer)?;
        self.our.balance_proof = Some(signed);
        self.our.locks = registry;
        debug!(
            channel = ?self.identity.channel_id,
            nonce = signed.proof.nonce,
            %amount,
            locked = lock.is_some(),
            "signed transfer"
        );
        Ok(signed)
    }

    /// Settle one of our locks off-chain once the secret is known.
    pub fn apply_local_unlock(
        &mut self,
        secret: Hash,
        signer: &Signer,
    ) -> Result<SignedBalanceProof, LedgerError> {
        self.ensure_opened()?;
        self.ensure_our_signer(signer)?;

        let mut registry = self.our.locks.clone();
        let lock = registry.unlock(&secret)?;
        let transferred = self.our.transferred_amount().saturating_add(lock.amount);

        let signed = self.sign_next(transferred, registry.compute_root(), lock.secret_hash, signer)?;
        self.our.balance_proof = Some(signed);
        self.our.locks = registry;
        debug!(
            channel = ?self.identity.channel_id,
            nonce = signed.proof.nonce,
            secret_hash = ?lock.secret_hash,
            "unlocked lock"
        );
        Ok(signed)
    }

    /// Remove one of our locks that expired without the secret being revealed.
    pub fn apply_local_expire(
        &mut self,
        secret_hash: Hash,
        block: u64,
        signer: &Signer,
    ) -> Result<SignedBalanceProof, LedgerError> {
        self.ensure_opened()?;
        self.ensure_our_signer(signer)?;

        let mut registry = self.our.locks.clone();
        remove_expired(&mut registry, secret_hash, block)?;

        let signed = self.sign_next(
            self.our.transferred_amount(),
            registry.compute_root(),
            secret_hash,
            signer,
        )?;
        self.our.balance_proof = Some(signed);
        self.our.locks = registry;
        debug!(
            channel = ?self.identity.channel_id,
            nonce = signed.proof.nonce,
            ?secret_hash,
            "removed expired lock"
        );
        Ok(signed)
    }

    /// Validate and accept a balance proof from the partner.
    pub fn apply_remote_balance_proof(
        &mut self,
        signed: &SignedBalanceProof,
        change: &BalanceChange,
        block: u64,
    ) -> Result<(), LedgerError> {
        let result = self.check_remote_balance_proof(signed, change, block);
        match result {
            Ok(registry) => {
                self.partner.balance_proof = Some(*signed);
                self.partner.locks = registry;
                info!(
                    channel = ?self.identity.channel_id,
                    nonce = signed.proof.nonce,
                    transferred = %signed.proof.transferred_amount,
                    "accepted balance proof"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    channel = ?self.identity.channel_id,
                    nonce = signed.proof.nonce,
                    error = %e,
                    "rejected balance proof"
                );
                Err(e)
            }
        }
    }

    fn check_remote_balance_proof(
        &self,
        signed: &SignedBalanceProof,
        change: &BalanceChange,
        block: u64,
    ) -> Result<locks::LockRegistry, LedgerError> {
        self.ensure_opened()?;
        let proof = &signed.proof;

        if proof.binding != self.identity.binding() {
            return Err(LedgerError::ChannelMismatch);
        }
        signed.ensure_signed_by(self.partner.address)?;

        let current_nonce = self.partner.nonce();
        if proof.nonce <= current_nonce {
            return Err(LedgerError::StaleNonce {
                current: current_nonce,
                received: proof.nonce,
            });
        }

        let current_amount = self.partner.transferred_amount();
        if proof.transferred_amount < current_amount {
            return Err(LedgerError::TransferredAmountDecreased {
                current: current_amount,
                received: proof.transferred_amount,
            });
        }

        let mut registry = self.partner.locks.clone();
        let expected_amount = match *change {
            BalanceChange::Direct => proof.transferred_amount,
            BalanceChange::Lock(lock) => {
                registry.add_lock(lock, block)?;
                current_amount
            }
            BalanceChange::Unlock { secret } => {
                let lock = registry.unlock(&secret)?;
                current_amount.saturating_add(lock.amount)
            }
            BalanceChange::Expire { secret_hash } => {
                remove_expired(&mut registry, secret_hash, block)?;
                current_amount
            }
        };
        if proof.transferred_amount != expected_amount {
            return Err(LedgerError::UnexpectedAmount {
                expected: expected_amount,
                received: proof.transferred_amount,
            });
        }

        let root = registry.compute_root();
        if proof.locks_root != root {
            return Err(LedgerError::LocksRootMismatch {
                expected: root,
                received: proof.locks_root,
            });
        }

        // The partner can only ever send what it deposited plus what it
        // received from us, less a withdraw we co-signed.
        let owned = self
            .partner
            .net_deposit()
            .saturating_add(self.our.transferred_amount())
            .saturating_sub(self.withdrawing(self.partner.address)?);
        let committed = proof
            .transferred_amount
            .checked_add(registry.locked_amount())
            .ok_or(LedgerError::InsufficientDeposit)?;
        if committed > owned {
            return Err(LedgerError::InsufficientDeposit);
        }

        Ok(registry)
    }

    /// Record a secret learned off-chain for whichever lock uses it.
    pub fn reveal_secret(&mut self, secret: Hash) -> bool {
        let ours = self.our.locks.reveal_secret(secret);
        let theirs = self.partner.locks.reveal_secret(secret);
        ours || theirs
    }

    pub fn apply_chain_event(&mut self, event: &ChainEvent) -> Result<(), LedgerError> {
        match *event {
            ChainEvent::Opened { .. } => {
                self.ensure_state(ChannelState::Pending, "Opened")?;
                self.state = ChannelState::Opened;
            }
            ChainEvent::Deposited {
                participant,
                total_deposit,
            } => {
                if self.state > ChannelState::Opened {
                    return Err(LedgerError::InvalidTransition {
                        from: self.state,
                        event: "Deposited",
                    });
                }
                let end = self.end_mut(participant)?;
                // Totals never shrink, an older event is a no-op.
                end.deposit = end.deposit.max(total_deposit);
                self.drop_stale_partner_withdraw();
            }
            ChainEvent::Withdrawn {
                participant,
                total_withdraw,
            } => {
                self.ensure_state(ChannelState::Opened, "Withdrawn")?;
                let end = self.end_mut(participant)?;
                end.withdrawn = end.withdrawn.max(total_withdraw);
                if participant == self.our.address {
                    self.pending_withdraw = None;
                }
                self.drop_stale_partner_withdraw();
            }
            ChainEvent::Closed {
                closing_participant,
                block,
                recorded_nonce,
            } => {
                self.ensure_state(ChannelState::Opened, "Closed")?;
                let non_closing = self
                    .identity
                    .partner_of(closing_participant)
                    .ok_or(LedgerError::UnknownParticipant(closing_participant))?;
                self.end_mut(non_closing)?.chain_nonce = recorded_nonce;
                self.closed_block = Some(block);
                self.closing_participant = Some(closing_participant);
                self.pending_withdraw = None;
                self.partner_withdraw = None;
                self.state = ChannelState::Closed;
            }
            ChainEvent::BalanceProofUpdated {
                closing_participant,
                nonce,
            } => {
                self.ensure_state(ChannelState::Closed, "BalanceProofUpdated")?;
                let end = self.end_mut(closing_participant)?;
                end.chain_nonce = end.chain_nonce.max(nonce);
            }
            ChainEvent::Settled { block } => {
                self.ensure_state(ChannelState::Closed, "Settled")?;
                self.settled_block = Some(block);
                self.state = ChannelState::Settled;
            }
            ChainEvent::CooperativelySettled { block } => {
                self.ensure_state(ChannelState::Opened, "CooperativelySettled")?;
                self.settled_block = Some(block);
                self.pending_withdraw = None;
                self.partner_withdraw = None;
                self.state = ChannelState::Settled;
            }
            ChainEvent::SecretRegistered { secret, .. } => {
                if self.state == ChannelState::Settled {
                    return Err(LedgerError::InvalidTransition {
                        from: self.state,
                        event: "SecretRegistered",
                    });
                }
                self.registered_secrets.insert(locks::secret_hash(&secret));
                self.reveal_secret(secret);
            }
            ChainEvent::Unlocked {
                sender,
                secret_hash,
            } => {
                self.ensure_state(ChannelState::Closed, "Unlocked")?;
                match self.end_mut(sender)?.locks.remove_lock(&secret_hash) {
                    Ok(_) | Err(LockError::LockNotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        info!(
            channel = ?self.identity.channel_id,
            ?event,
            state = ?self.state,
            "applied chain event"
        );
        Ok(())
    }

    /// Close with the partner's latest balance proof.
    pub fn close(&self) -> Result<ChainCall, LedgerError> {
        self.ensure_opened()?;
        Ok(ChainCall::Close {
            channel_id: self.identity.channel_id,
            partner_proof: self.partner.balance_proof,
        })
    }

    /// After the partner closed: submit its newest balance proof if the
    /// chain only knows an older one.
    pub fn update_transfer(&self) -> Result<ChainCall, LedgerError> {
        self.ensure_state(ChannelState::Closed, "update_transfer")?;
        if self.closing_participant != Some(self.partner.address) {
            return Err(LedgerError::NothingToUpdate);
        }
        match self.partner.balance_proof {
            Some(proof) if proof.proof.nonce > self.partner.chain_nonce => {
                Ok(ChainCall::UpdateBalanceProof {
                    channel_id: self.identity.channel_id,
                    closing_participant: self.partner.address,
                    proof,
                })
            }
            _ => Err(LedgerError::NothingToUpdate),
        }
    }

    /// Authorize a third party to submit the partner's proof on our behalf.
    pub fn sign_balance_proof_update(
        &self,
        signer: &Signer,
    ) -> Result<(BalanceProofUpdate, Signature), LedgerError> {
        self.ensure_our_signer(signer)?;
        let proof = self
            .partner
            .balance_proof
            .ok_or(LedgerError::NothingToUpdate)?;
        let update = BalanceProofUpdate::from(proof);
        let signature = update.sign(signer)?;
        Ok((update, signature))
    }

    /// Authorize `agent` to unlock the partner's lock on `secret_hash` for
    /// us, together with the proof that the lock is in the partner's locks
    /// root.
    pub fn sign_unlock_delegate(
        &self,
        agent: Address,
        secret_hash: Hash,
        signer: &Signer,
    ) -> Result<UnlockDelegateRequest, LedgerError> {
        if !matches!(self.state, ChannelState::Opened | ChannelState::Closed) {
            return Err(LedgerError::InvalidTransition {
                from: self.state,
                event: "sign_unlock_delegate",
            });
        }
        self.ensure_our_signer(signer)?;
        let pending = self
            .partner
            .locks
            .get(&secret_hash)
            .ok_or(LockError::LockNotFound(secret_hash))?;
        let proof = self.partner.locks.prove_inclusion(&secret_hash)?;

        let delegate = UnlockDelegate {
            agent,
            expiration: pending.lock.expiration.into(),
            amount: pending.lock.amount,
            secret_hash,
            binding: self.identity.binding(),
        };
        Ok(UnlockDelegateRequest {
            delegate,
            proof: proof.to_bytes(),
            signature: delegate.sign(signer)?,
        })
    }

    pub fn settle(&self, block: u64) -> Result<ChainCall, LedgerError> {
        self.ensure_state(ChannelState::Closed, "settle")?;
        let settle_block = self.settle_block().unwrap_or(u64::MAX);
        if block < settle_block {
            return Err(LedgerError::SettleTooEarly {
                settle_block,
                block,
            });
        }

        let data = |end: &ChannelEnd| BalanceData {
            locks_root: end.locks_root(),
            transferred_amount: end.transferred_amount(),
        };
        let p1 = self.end(self.identity.participant1)?;
        let p2 = self.end(self.identity.participant2)?;
        Ok(ChainCall::Settle {
            channel_id: self.identity.channel_id,
            participant1: p1.address,
            data1: data(p1),
            participant2: p2.address,
            data2: data(p2),
        })
    }

    pub fn cooperative_settle_payload(&self) -> Result<CooperativeSettle, LedgerError> {
        self.ensure_opened()?;
        if !self.our.locks.is_empty() || !self.partner.locks.is_empty() {
            return Err(LedgerError::PendingLocks);
        }
        let participant1 = self.identity.participant1;
        let participant2 = self.identity.participant2;
        Ok(CooperativeSettle {
            participant1,
            balance1: self.balance(participant1)?,
            participant2,
            balance2: self.balance(participant2)?,
            binding: self.identity.binding(),
        })
    }

    pub fn sign_cooperative_settle(&self, signer: &Signer) -> Result<Signature, LedgerError> {
        self.ensure_our_signer(signer)?;
        Ok(self.cooperative_settle_payload()?.sign(signer)?)
    }

    /// Combine the partner's signature with ours into the settle call.
    pub fn cooperative_settle(
        &self,
        partner_sig: Signature,
        signer: &Signer,
    ) -> Result<ChainCall, LedgerError> {
        self.ensure_our_signer(signer)?;
        let payload = self.cooperative_settle_payload()?;
        payload.ensure_signed_by(partner_sig, self.partner.address)?;
        let our_sig = payload.sign(signer)?;

        let (signature1, signature2) = if self.our.address == payload.participant1 {
            (our_sig, partner_sig)
        } else {
            (partner_sig, our_sig)
        };
        Ok(ChainCall::CooperativeSettle {
            payload,
            signature1,
            signature2,
        })
    }

    /// Sign our half of a withdraw and remember it until the partner
    /// co-signs or `deadline` passes.
    pub fn request_withdraw(
        &mut self,
        amount: U256,
        deadline: u64,
        signer: &Signer,
    ) -> Result<WithdrawRequest, LedgerError> {
        self.ensure_opened()?;
        self.ensure_our_signer(signer)?;
        if self.pending_withdraw.is_some() {
            return Err(LedgerError::WithdrawPending);
        }
        let available = self.distributable(self.our.address)?;
        if amount > available {
            return Err(LedgerError::InsufficientBalance {
                available,
                requested: amount,
            });
        }

        let payload = Withdraw1 {
            participant1: self.our.address,
            deposit1: self.our.net_deposit(),
            participant2: self.partner.address,
            deposit2: self.partner.net_deposit(),
            withdraw1: amount,
            binding: self.identity.binding(),
        };
        let request = WithdrawRequest {
            payload,
            signature: payload.sign(signer)?,
            deadline,
        };
        self.pending_withdraw = Some(request);
        info!(
            channel = ?self.identity.channel_id,
            %amount,
            deadline,
            "requested withdraw"
        );
        Ok(request)
    }

    /// Co-sign the partner's withdraw request. The amount stays reserved
    /// until the withdraw shows up on-chain or the net deposits it was signed
    /// over change.
    pub fn accept_withdraw(
        &mut self,
        request: &WithdrawRequest,
        block: u64,
        signer: &Signer,
    ) -> Result<Signature, LedgerError> {
        self.ensure_opened()?;
        self.ensure_our_signer(signer)?;
        let payload = &request.payload;

        if payload.binding != self.identity.binding() {
            return Err(LedgerError::ChannelMismatch);
        }
        if payload.participant1 != self.partner.address {
            return Err(LedgerError::UnknownParticipant(payload.participant1));
        }
        if payload.participant2 != self.our.address {
            return Err(LedgerError::UnknownParticipant(payload.participant2));
        }
        if block > request.deadline {
            return Err(LedgerError::WithdrawExpired {
                deadline: request.deadline,
                block,
            });
        }
        for (expected, received) in [
            (self.partner.net_deposit(), payload.deposit1),
            (self.our.net_deposit(), payload.deposit2),
        ] {
            if expected != received {
                return Err(LedgerError::UnexpectedAmount { expected, received });
            }
        }
        // Co-signed withdraws over the same deposits exclude each other
        // on-chain, so an earlier one does not count against this one.
        let available = self
            .balance(self.partner.address)?
            .saturating_sub(self.locked(self.partner.address)?);
        if payload.withdraw1 > available {
            return Err(LedgerError::InsufficientBalance {
                available,
                requested: payload.withdraw1,
            });
        }
        payload.ensure_signed_by(request.signature, self.partner.address)?;
        let signature = payload.with_partner_withdraw(U256::zero()).sign(signer)?;

        if self.withdrawing(self.partner.address)? <= payload.withdraw1 {
            self.partner_withdraw = Some(*request);
        }
        info!(
            channel = ?self.identity.channel_id,
            amount = %payload.withdraw1,
            "co-signed partner withdraw"
        );
        Ok(signature)
    }

    fn drop_stale_partner_withdraw(&mut self) {
        if let Some(request) = self.partner_withdraw {
            if request.payload.deposit1 != self.partner.net_deposit()
                || request.payload.deposit2 != self.our.net_deposit()
            {
                debug!(channel = ?self.identity.channel_id, "dropped stale partner withdraw");
                self.partner_withdraw = None;
            }
        }
    }

    /// Turn our pending request plus the partner's co-signature into the
    /// withdraw call.
    pub fn withdraw(
        &self,
        amount: U256,
        partner_sig: Signature,
        signer: &Signer,
    ) -> Result<ChainCall, LedgerError> {
        self.ensure_opened()?;
        self.ensure_our_signer(signer)?;
        let pending = self
            .pending_withdraw
            .ok_or(LedgerError::NoPendingWithdraw)?;
        if pending.payload.withdraw1 != amount {
            return Err(LedgerError::UnexpectedAmount {
                expected: pending.payload.withdraw1,
                received: amount,
            });
        }

        let mut auth = WithdrawAuthorization::from_request(&pending);
        auth.signature2 = Some(partner_sig);
        auth.into_chain_call()
    }

    /// Drop our pending withdraw request once its deadline passed.
    pub fn expire_withdraw(&mut self, block: u64) -> Option<WithdrawRequest> {
        match self.pending_withdraw {
            Some(pending) if block > pending.deadline => {
                info!(
                    channel = ?self.identity.channel_id,
                    deadline = pending.deadline,
                    block,
                    "withdraw request expired"
                );
                self.pending_withdraw.take()
            }
            _ => None,
        }
    }

    /// Unlock calls for partner locks whose secret we know.
    pub fn unlock_calls(&self) -> Vec<ChainCall> {
        self.partner
            .locks
            .revealed()
            .filter_map(|(lock, _)| {
                let proof = self.partner.locks.prove_inclusion(&lock.secret_hash).ok()?;
                Some(ChainCall::Unlock {
                    channel_id: self.identity.channel_id,
                    sender: self.partner.address,
                    lock: *lock,
                    proof,
                })
            })
            .collect()
    }

    /// Known but unregistered secrets of partner locks that have to go
    /// on-chain: once closed all of them, while open those whose lock expires
    /// within `reveal_timeout`.
    pub fn secrets_to_register(&self, block: u64, reveal_timeout: u64) -> Vec<Hash> {
        let closed = self.state == ChannelState::Closed;
        self.partner
            .locks
            .revealed()
            .filter(|(lock, _)| {
                !self.registered_secrets.contains(&lock.secret_hash)
                    && !lock.is_expired(block)
                    && (closed || lock.expiration <= block.saturating_add(reveal_timeout))
            })
            .map(|(_, secret)| *secret)
            .collect()
    }

    /// Drop expired locks on both sides without a new balance proof. Only
    /// used once locks can no longer be unlocked on-chain.
    pub fn prune_expired_locks(&mut self, block: u64) -> Vec<Lock> {
        let mut pruned = self.our.locks.prune_expired(block);
        pruned.extend(self.partner.locks.prune_expired(block));
        pruned
    }

    /// Give up on the listed locks of either side, whether expired or not.
    /// Used once the unlock window after settlement has closed.
    pub fn abandon_locks(&mut self, secret_hashes: &[Hash]) -> Vec<Lock> {
        let mut abandoned = Vec::new();
        for secret_hash in secret_hashes {
            for registry in [&mut self.our.locks, &mut self.partner.locks] {
                if let Ok(lock) = registry.remove_lock(secret_hash) {
                    abandoned.push(lock);
                }
            }
        }
        if !abandoned.is_empty() {
            info!(
                channel = ?self.identity.channel_id,
                count = abandoned.len(),
                "abandoned unclaimable locks"
            );
        }
        abandoned
    }
}

fn remove_expired(
    registry: &mut locks::LockRegistry,
    secret_hash: Hash,
    block: u64,
) -> Result<Lock, LedgerError> {
    let pending = registry
        .get(&secret_hash)
        .ok_or(LockError::LockNotFound(secret_hash))?;
    if !pending.lock.is_expired(block) {
        return Err(LedgerError::LockNotExpired {
            secret_hash,
            expiration: pending.lock.expiration,
        });
    }
    Ok(registry.remove_lock(&secret_hash)?)
}
