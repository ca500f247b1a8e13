//! The node: owns the channels of one participant and wires the ledger,
//! transfer records and acks to the host's chain, transport and store.
//!
//! Every channel is guarded by its own mutex. An operation clones the
//! ledger under that mutex, applies itself to the clone inside one store
//! transaction and only swaps the clone in after the transaction committed.
//! Messages and chain calls produced along the way leave the node after the
//! mutex is released.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use prost::Message as _;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{
    ack::{self, AckRecord},
    chain::{submit_with_retry, ChainCall, ChainEvent, ChainService},
    channel::{BalanceChange, ChannelIdentity, ChannelLedger, ChannelState, LedgerError},
    codec::{BalanceProofUpdate, UnlockDelegateRequest},
    config::Config,
    driver::{self, Action, Driver},
    error::Error,
    locks::{self, Lock},
    packed::types::{Address, Hash, Signature, U256},
    sig::Signer,
    storage::{Store, Transaction, CHANNEL_BUCKET},
    transfer::{self, Role, TransferEvent, TransferRecord},
    wire::{Message, StoredChannel},
};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("could not reach peer: {0}")]
pub struct TransportError(pub String);

/// Outbound half of the peer network, implemented by the host. Inbound
/// messages enter through [Node::on_receive].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, peer: Address, bytes: Vec<u8>) -> Result<(), TransportError>;
}

struct ChannelSlot {
    ledger: ChannelLedger,
    /// Set when persisting a mutation failed. The in-memory ledger may then
    /// be ahead of or behind the store, so nothing touches it anymore.
    halted: bool,
}

/// Side effects collected under the channel lock.
#[derive(Default)]
struct Effects {
    messages: Vec<(Address, Message)>,
    calls: Vec<(Hash, ChainCall)>,
}

impl Effects {
    fn send(&mut self, peer: Address, message: Message) {
        self.messages.push((peer, message));
    }

    fn submit(&mut self, channel_id: Hash, call: ChainCall) {
        self.calls.push((channel_id, call));
    }
}

type Slot = Arc<Mutex<ChannelSlot>>;

pub struct Node<C, T, S> {
    config: Config,
    signer: Signer,
    chain: Arc<C>,
    transport: Arc<T>,
    store: Arc<S>,
    channels: RwLock<HashMap<Hash, Slot>>,
    driver: Arc<Mutex<Driver>>,
    block: AtomicU64,
}

impl<C, T, S> Node<C, T, S>
where
    C: ChainService + 'static,
    T: Transport + 'static,
    S: Store + 'static,
{
    /// Create a node and load every channel persisted in `store`.
    pub fn new(
        config: Config,
        signer: Signer,
        chain: Arc<C>,
        transport: Arc<T>,
        store: Arc<S>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let mut channels = HashMap::new();
        for (_, bytes) in store.all(CHANNEL_BUCKET)? {
            let stored = StoredChannel::decode(bytes.as_slice())
                .map_err(crate::wire::ConversionError::from)?;
            let ledger = ChannelLedger::try_from(stored)?;
            debug!(channel = ?ledger.channel_id(), state = ?ledger.state(), "restored channel");
            channels.insert(
                ledger.channel_id(),
                Arc::new(Mutex::new(ChannelSlot {
                    ledger,
                    halted: false,
                })),
            );
        }
        let unfinished = transfer::list_unfinished(&*store)?;
        info!(
            address = ?signer.address(),
            channels = channels.len(),
            unfinished_transfers = unfinished.len(),
            "node started"
        );

        Ok(Self {
            driver: Arc::new(Mutex::new(Driver::new(config.clone()))),
            config,
            signer,
            chain,
            transport,
            store,
            channels: RwLock::new(channels),
            block: AtomicU64::new(0),
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Latest block seen by [Node::on_block].
    pub fn block(&self) -> u64 {
        self.block.load(Ordering::SeqCst)
    }

    async fn slot(&self, channel_id: Hash) -> Result<Slot, Error> {
        self.channels
            .read()
            .await
            .get(&channel_id)
            .cloned()
            .ok_or(Error::UnknownChannel(channel_id))
    }

    /// A copy of the channel's current state.
    pub async fn channel(&self, channel_id: Hash) -> Result<ChannelLedger, Error> {
        let slot = self.slot(channel_id).await?;
        let slot = slot.lock().await;
        Ok(slot.ledger.clone())
    }

    pub async fn channel_ids(&self) -> Vec<Hash> {
        self.channels.read().await.keys().copied().collect()
    }

    pub async fn is_halted(&self, channel_id: Hash) -> Result<bool, Error> {
        Ok(self.slot(channel_id).await?.lock().await.halted)
    }

    pub fn unfinished_transfers(&self) -> Result<Vec<TransferRecord>, Error> {
        Ok(transfer::list_unfinished(&*self.store)?)
    }

    /// Run `f` on a copy of the channel inside one store transaction and
    /// keep the result only if the transaction commits.
    ///
    /// A read failing inside `f` aborts the operation before anything is
    /// written, so the channel stays usable. A failed commit leaves the
    /// store's state unknown and halts the channel.
    async fn with_channel<R, F>(&self, channel_id: Hash, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut ChannelLedger, &mut Transaction<'_, S>, &mut Effects) -> Result<R, Error>,
    {
        let slot = self.slot(channel_id).await?;
        let mut effects = Effects::default();
        let result = {
            let mut slot = slot.lock().await;
            if slot.halted {
                return Err(Error::ChannelHalted(channel_id));
            }
            let mut ledger = slot.ledger.clone();
            let mut tx = self.store.begin();
            let result = f(&mut ledger, &mut tx, &mut effects)?;

            tx.set(
                CHANNEL_BUCKET,
                channel_id.0,
                StoredChannel::from(&ledger).encode_to_vec(),
            );
            if let Err(e) = tx.commit() {
                slot.halted = true;
                error!(channel = ?channel_id, error = %e, "persisting channel failed, channel halted");
                return Err(Error::PersistenceFailure(e));
            }
            slot.ledger = ledger;
            result
        };
        self.flush(effects).await;
        Ok(result)
    }

    async fn flush(&self, effects: Effects) {
        for (peer, message) in effects.messages {
            if let Err(e) = self.transport.send(peer, message.encode()).await {
                warn!(?peer, error = %e, "sending message failed");
            }
        }
        for (channel_id, call) in effects.calls {
            self.dispatch(channel_id, call);
        }
    }

    /// Submit `call` in the background. The driver is told when it is done
    /// so the call can be scheduled again if needed.
    fn dispatch(&self, channel_id: Hash, call: ChainCall) {
        let chain = Arc::clone(&self.chain);
        let driver = Arc::clone(&self.driver);
        let retry = self.config.chain_retry;
        tokio::spawn(async move {
            let kind = call.kind();
            match submit_with_retry(&*chain, call, &retry).await {
                Ok(receipt) => info!(
                    channel = ?channel_id,
                    ?kind,
                    tx = ?receipt.tx_hash,
                    block = receipt.block,
                    "chain call mined"
                ),
                Err(e) => error!(channel = ?channel_id, ?kind, error = %e, "chain call failed"),
            }
            driver.lock().await.complete(channel_id, kind);
        });
    }

    fn ensure_partner(ledger: &ChannelLedger, sender: Address) -> Result<(), Error> {
        if ledger.partner().address != sender {
            return Err(LedgerError::UnknownParticipant(sender).into());
        }
        Ok(())
    }

    /// Track a new channel. It becomes usable with [ChainEvent::Opened].
    pub async fn open_channel(
        &self,
        partner: Address,
        token_network: Address,
        open_block: u64,
        chain_id: U256,
    ) -> Result<Hash, Error> {
        let identity = ChannelIdentity::new(
            self.address(),
            partner,
            token_network,
            open_block,
            self.config.settle_timeout,
            chain_id,
        );
        let ledger = ChannelLedger::new(identity, self.address())?;
        let channel_id = identity.channel_id;

        let mut channels = self.channels.write().await;
        if channels.contains_key(&channel_id) {
            return Err(Error::ChannelExists(channel_id));
        }
        let mut tx = self.store.begin();
        tx.set(
            CHANNEL_BUCKET,
            channel_id.0,
            StoredChannel::from(&ledger).encode_to_vec(),
        );
        tx.commit()?;
        channels.insert(
            channel_id,
            Arc::new(Mutex::new(ChannelSlot {
                ledger,
                halted: false,
            })),
        );
        info!(channel = ?channel_id, ?partner, "channel tracked");
        Ok(channel_id)
    }

    pub async fn on_chain_event(&self, channel_id: Hash, event: ChainEvent) -> Result<(), Error> {
        self.with_channel(channel_id, |ledger, _, _| {
            ledger.apply_chain_event(&event)?;
            Ok(())
        })
        .await
    }

    /// Catch up with the contract's deposits and withdrawals.
    pub async fn sync_channel(&self, channel_id: Hash) -> Result<(), Error> {
        let snapshot = self.chain.query_channel(channel_id).await?;
        self.with_channel(channel_id, |ledger, _, _| {
            if ledger.state() == ChannelState::Pending {
                ledger.apply_chain_event(&ChainEvent::Opened {
                    block: snapshot.open_block,
                })?;
            }
            if ledger.state() != ChannelState::Opened {
                return Ok(());
            }
            for participant in snapshot.participants {
                ledger.apply_chain_event(&ChainEvent::Deposited {
                    participant: participant.address,
                    total_deposit: participant.deposit,
                })?;
                if !participant.withdrawn.is_zero() {
                    ledger.apply_chain_event(&ChainEvent::Withdrawn {
                        participant: participant.address,
                        total_withdraw: participant.withdrawn,
                    })?;
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn deposit(&self, channel_id: Hash, total_deposit: U256) -> Result<(), Error> {
        let ledger = self.channel(channel_id).await?;
        if ledger.state() != ChannelState::Opened {
            return Err(LedgerError::NotOpened(ledger.state()).into());
        }
        self.dispatch(
            channel_id,
            ChainCall::Deposit {
                channel_id,
                participant: self.address(),
                total_deposit,
            },
        );
        Ok(())
    }

    pub async fn send_direct_transfer(&self, channel_id: Hash, amount: U256) -> Result<(), Error> {
        let block = self.block();
        self.with_channel(channel_id, |ledger, _, effects| {
            let proof = ledger.apply_local_transfer(amount, None, block, &self.signer)?;
            effects.send(ledger.partner().address, Message::DirectTransfer { proof });
            Ok(())
        })
        .await
    }

    /// Lock `amount` to the partner under `secret`. Returns the secret hash
    /// identifying the transfer.
    pub async fn send_locked_transfer(
        &self,
        channel_id: Hash,
        amount: U256,
        secret: Hash,
        expiration: u64,
    ) -> Result<Hash, Error> {
        let block = self.block();
        let lock = Lock {
            secret_hash: locks::secret_hash(&secret),
            amount,
            expiration,
        };
        self.with_channel(channel_id, |ledger, tx, effects| {
            let partner = ledger.partner().address;
            let proof = ledger.apply_local_transfer(amount, Some(lock), block, &self.signer)?;
            let record = TransferRecord::initiator(
                lock,
                secret,
                channel_id,
                self.address(),
                partner,
                self.config.reveal_timeout,
            );
            transfer::create(tx, &record)?;
            transfer::advance(tx, &record, &TransferEvent::LockSent)?;
            effects.send(
                partner,
                Message::LockedTransfer {
                    proof,
                    lock,
                    initiator: self.address(),
                    target: partner,
                },
            );
            Ok(lock.secret_hash)
        })
        .await
    }

    /// Settle one of our locks off-chain with its secret.
    pub async fn send_unlock(&self, channel_id: Hash, secret: Hash) -> Result<(), Error> {
        self.with_channel(channel_id, |ledger, tx, effects| {
            self.unlock_in(ledger, tx, effects, secret)
        })
        .await
    }

    fn unlock_in(
        &self,
        ledger: &mut ChannelLedger,
        tx: &mut Transaction<'_, S>,
        effects: &mut Effects,
        secret: Hash,
    ) -> Result<(), Error> {
        let proof = ledger.apply_local_unlock(secret, &self.signer)?;
        if let Some(mut record) = transfer::load(tx, &locks::secret_hash(&secret))? {
            if record.phase != transfer::Phase::SecretRevealed {
                record = transfer::advance(tx, &record, &TransferEvent::SecretRevealed { secret })?;
            }
            let record = transfer::advance(tx, &record, &TransferEvent::Unlocked)?;
            transfer::advance(tx, &record, &TransferEvent::Completed)?;
        }
        effects.send(ledger.partner().address, Message::Unlock { proof, secret });
        Ok(())
    }

    /// Withdraw one of our locks that expired unclaimed.
    pub async fn expire_lock(&self, channel_id: Hash, secret_hash: Hash) -> Result<(), Error> {
        let block = self.block();
        self.with_channel(channel_id, |ledger, tx, effects| {
            self.expire_in(ledger, tx, effects, secret_hash, block)
        })
        .await
    }

    fn expire_in(
        &self,
        ledger: &mut ChannelLedger,
        tx: &mut Transaction<'_, S>,
        effects: &mut Effects,
        secret_hash: Hash,
        block: u64,
    ) -> Result<(), Error> {
        let proof = ledger.apply_local_expire(secret_hash, block, &self.signer)?;
        expire_record(tx, &secret_hash)?;
        effects.send(
            ledger.partner().address,
            Message::RemoveExpiredLock { proof, secret_hash },
        );
        Ok(())
    }

    pub async fn request_withdraw(&self, channel_id: Hash, amount: U256) -> Result<(), Error> {
        let deadline = self.config.withdraw_deadline(self.block());
        self.with_channel(channel_id, |ledger, _, effects| {
            let request = ledger.request_withdraw(amount, deadline, &self.signer)?;
            effects.send(ledger.partner().address, Message::WithdrawRequest(request));
            Ok(())
        })
        .await
    }

    /// Ask the partner to co-sign settling the channel at the current
    /// balances.
    pub async fn cooperative_settle(&self, channel_id: Hash) -> Result<(), Error> {
        self.with_channel(channel_id, |ledger, _, effects| {
            let signature = ledger.sign_cooperative_settle(&self.signer)?;
            effects.send(
                ledger.partner().address,
                Message::CooperativeSettleRequest {
                    channel_id,
                    signature,
                },
            );
            Ok(())
        })
        .await
    }

    pub async fn close(&self, channel_id: Hash) -> Result<(), Error> {
        self.with_channel(channel_id, |ledger, _, effects| {
            effects.submit(channel_id, ledger.close()?);
            Ok(())
        })
        .await
    }

    /// Material for a third party to submit the partner's newest balance
    /// proof after the partner closed, and the block it has to do so by.
    pub async fn delegate_update(
        &self,
        channel_id: Hash,
    ) -> Result<(BalanceProofUpdate, Signature, Option<u64>), Error> {
        let ledger = self.channel(channel_id).await?;
        let (update, signature) = ledger.sign_balance_proof_update(&self.signer)?;
        Ok((
            update,
            signature,
            driver::delegate_update_block(&self.config, &ledger),
        ))
    }

    /// Let `agent` unlock the partner's lock on `secret_hash` on-chain for
    /// us.
    pub async fn delegate_unlock(
        &self,
        channel_id: Hash,
        agent: Address,
        secret_hash: Hash,
    ) -> Result<UnlockDelegateRequest, Error> {
        let ledger = self.channel(channel_id).await?;
        Ok(ledger.sign_unlock_delegate(agent, secret_hash, &self.signer)?)
    }

    /// Handle one message from `sender` and return the bytes to answer with.
    /// A message that was already processed is answered from the ack store
    /// without being applied again, and the replies it caused are sent again.
    pub async fn on_receive(&self, sender: Address, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let echo_hash = ack::echo_hash(bytes, &sender);
        if let Some(record) = ack::get(&*self.store, &echo_hash)? {
            self.resend(sender, record.replies).await;
            return Ok(record.response);
        }

        let message = Message::decode(bytes)?;
        let Some(channel_id) = message.channel_id() else {
            // Acks confirm our own messages and need no answer.
            return Ok(Vec::new());
        };
        let block = self.block();

        let (record, duplicate) = self
            .with_channel(channel_id, |ledger, tx, effects| {
                // Retransmission that raced the first copy.
                if let Some(stored) = ack::get_in(tx, &echo_hash)? {
                    return Ok((stored, true));
                }
                Self::ensure_partner(ledger, sender)?;
                self.process(ledger, tx, effects, message, block)?;
                let record = AckRecord {
                    response: Message::Ack { echo_hash }.encode(),
                    replies: effects
                        .messages
                        .iter()
                        .filter(|(peer, _)| *peer == sender)
                        .map(|(_, reply)| reply.encode())
                        .collect(),
                };
                ack::put(tx, &echo_hash, &record);
                Ok((record, false))
            })
            .await?;
        if duplicate {
            self.resend(sender, record.replies).await;
        }
        Ok(record.response)
    }

    async fn resend(&self, peer: Address, replies: Vec<Vec<u8>>) {
        if !replies.is_empty() {
            debug!(?peer, count = replies.len(), "resending replies to retransmitted message");
        }
        for bytes in replies {
            if let Err(e) = self.transport.send(peer, bytes).await {
                warn!(?peer, error = %e, "sending message failed");
            }
        }
    }

    fn process(
        &self,
        ledger: &mut ChannelLedger,
        tx: &mut Transaction<'_, S>,
        effects: &mut Effects,
        message: Message,
        block: u64,
    ) -> Result<(), Error> {
        let partner = ledger.partner().address;
        let channel_id = ledger.channel_id();
        match message {
            Message::DirectTransfer { proof } => {
                ledger.apply_remote_balance_proof(&proof, &BalanceChange::Direct, block)?;
            }
            Message::LockedTransfer {
                proof,
                lock,
                initiator,
                target,
            } => {
                if target != self.address() {
                    return Err(Error::UnexpectedMessage("mediated transfers are not supported"));
                }
                ledger.apply_remote_balance_proof(&proof, &BalanceChange::Lock(lock), block)?;
                let record = TransferRecord::target(
                    lock,
                    channel_id,
                    initiator,
                    target,
                    self.config.reveal_timeout,
                );
                transfer::create(tx, &record)?;
                let record = transfer::advance(tx, &record, &TransferEvent::LockReceived)?;
                transfer::advance(tx, &record, &TransferEvent::SecretRequested)?;
                effects.send(
                    partner,
                    Message::SecretRequest {
                        channel_id,
                        secret_hash: lock.secret_hash,
                        amount: lock.amount,
                    },
                );
            }
            Message::SecretRequest {
                secret_hash,
                amount,
                ..
            } => {
                let record = transfer::load(tx, &secret_hash)?
                    .ok_or(transfer::TransferError::NotFound(secret_hash))?;
                if record.role != Role::Initiator || record.target != partner {
                    return Err(Error::UnexpectedMessage("secret request for a foreign transfer"));
                }
                if record.lock.amount != amount {
                    return Err(LedgerError::UnexpectedAmount {
                        expected: record.lock.amount,
                        received: amount,
                    }
                    .into());
                }
                let secret = record
                    .secret
                    .ok_or(Error::UnexpectedMessage("initiator without secret"))?;
                transfer::advance(tx, &record, &TransferEvent::SecretRequested)?;
                effects.send(partner, Message::RevealSecret { channel_id, secret });
            }
            Message::RevealSecret { secret, .. } => {
                let secret_hash = locks::secret_hash(&secret);
                ledger.reveal_secret(secret);
                match transfer::load(tx, &secret_hash)? {
                    Some(record) if record.role == Role::Target => {
                        transfer::advance(tx, &record, &TransferEvent::SecretRevealed { secret })?;
                        effects.send(partner, Message::RevealSecret { channel_id, secret });
                    }
                    Some(record) if record.role == Role::Initiator => {
                        // The target knows the secret, pay it off-chain.
                        self.unlock_in(ledger, tx, effects, secret)?;
                    }
                    _ => debug!(channel = ?channel_id, ?secret_hash, "secret for unknown transfer"),
                }
            }
            Message::Unlock { proof, secret } => {
                ledger.apply_remote_balance_proof(&proof, &BalanceChange::Unlock { secret }, block)?;
                if let Some(mut record) = transfer::load(tx, &locks::secret_hash(&secret))? {
                    if record.phase != transfer::Phase::SecretRevealed {
                        record =
                            transfer::advance(tx, &record, &TransferEvent::SecretRevealed { secret })?;
                    }
                    let record = transfer::advance(tx, &record, &TransferEvent::Unlocked)?;
                    transfer::advance(tx, &record, &TransferEvent::Completed)?;
                }
            }
            Message::RemoveExpiredLock { proof, secret_hash } => {
                ledger.apply_remote_balance_proof(
                    &proof,
                    &BalanceChange::Expire { secret_hash },
                    block,
                )?;
                expire_record(tx, &secret_hash)?;
            }
            Message::WithdrawRequest(request) => {
                let signature = ledger.accept_withdraw(&request, block, &self.signer)?;
                effects.send(
                    partner,
                    Message::WithdrawResponse {
                        channel_id,
                        signature,
                    },
                );
            }
            Message::WithdrawResponse { signature, .. } => {
                let amount = ledger
                    .pending_withdraw()
                    .map(|pending| pending.payload.withdraw1)
                    .ok_or(LedgerError::NoPendingWithdraw)?;
                let call = ledger.withdraw(amount, signature, &self.signer)?;
                effects.submit(channel_id, call);
            }
            Message::CooperativeSettleRequest { signature, .. } => {
                // Builds the call only to check the partner's signature.
                ledger.cooperative_settle(signature, &self.signer)?;
                let our_signature = ledger.sign_cooperative_settle(&self.signer)?;
                effects.send(
                    partner,
                    Message::CooperativeSettleResponse {
                        channel_id,
                        signature: our_signature,
                    },
                );
            }
            Message::CooperativeSettleResponse { signature, .. } => {
                let call = ledger.cooperative_settle(signature, &self.signer)?;
                effects.submit(channel_id, call);
            }
            Message::Ack { .. } => {}
        }
        Ok(())
    }

    /// Advance to `block`: run the driver over all channels, expire our
    /// unclaimed locks and stalled transfers. Failures are logged per
    /// channel and do not stop the others.
    pub async fn on_block(&self, block: u64) {
        self.block.fetch_max(block, Ordering::SeqCst);

        let slots: Vec<(Hash, Slot)> = self
            .channels
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();
        let mut ledgers = Vec::with_capacity(slots.len());
        for (_, slot) in &slots {
            let slot = slot.lock().await;
            if !slot.halted {
                ledgers.push(slot.ledger.clone());
            }
        }

        let actions = {
            let refs: Vec<&ChannelLedger> = ledgers.iter().collect();
            self.driver.lock().await.on_block(block, &refs)
        };
        for (channel_id, action) in actions {
            let result = match action {
                Action::Submit(call) => {
                    self.dispatch(channel_id, call);
                    Ok(())
                }
                Action::FailTransfers {
                    channel_id,
                    secret_hashes,
                } => {
                    self.with_channel(channel_id, |ledger, tx, _| {
                        transfer::fail(tx, &secret_hashes)?;
                        ledger.abandon_locks(&secret_hashes);
                        Ok(())
                    })
                    .await
                }
                Action::ExpireWithdraw { channel_id } => {
                    self.with_channel(channel_id, |ledger, _, _| {
                        ledger.expire_withdraw(block);
                        Ok(())
                    })
                    .await
                }
            };
            if let Err(e) = result {
                warn!(channel = ?channel_id, block, error = %e, "driver action failed");
            }
        }

        for ledger in &ledgers {
            if let Err(e) = self.expire_channel(ledger, block).await {
                warn!(channel = ?ledger.channel_id(), block, error = %e, "expiring locks failed");
            }
        }
    }

    async fn expire_channel(&self, snapshot: &ChannelLedger, block: u64) -> Result<(), Error> {
        let channel_id = snapshot.channel_id();
        let expired_locks: Vec<Hash> = if snapshot.state() == ChannelState::Opened {
            snapshot
                .our()
                .locks
                .iter()
                .filter(|pending| pending.lock.is_expired(block) && pending.secret.is_none())
                .map(|pending| pending.lock.secret_hash)
                .collect()
        } else {
            Vec::new()
        };
        let stalled = transfer::list_unfinished(&*self.store)?
            .iter()
            .any(|r| r.lock.is_expired(block) && r.channels().any(|c| c == channel_id));
        if expired_locks.is_empty() && !stalled {
            return Ok(());
        }

        self.with_channel(channel_id, |ledger, tx, effects| {
            for secret_hash in &expired_locks {
                self.expire_in(ledger, tx, effects, *secret_hash, block)?;
            }
            transfer::expire_stalled_on(tx, block, channel_id)?;
            Ok(())
        })
        .await
    }

    /// Poll the chain head every `poll_interval_ms` and feed new blocks to
    /// [Node::on_block] until `shutdown` turns true or its sender is gone.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.chain.current_block().await {
                        Ok(block) if block > self.block() => self.on_block(block).await,
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "polling chain head failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("node shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Expire the transfer locked by `secret_hash`, if we track it and it can
/// still expire.
fn expire_record<S: Store + ?Sized>(
    tx: &mut Transaction<'_, S>,
    secret_hash: &Hash,
) -> Result<(), Error> {
    if let Some(record) = transfer::load(tx, secret_hash)? {
        if transfer::next_phase(record.role, record.phase, &TransferEvent::Expire).is_some() {
            transfer::advance(tx, &record, &TransferEvent::Expire)?;
        }
    }
    Ok(())
}
