//! Durable progress of hash-time-locked transfers.
//!
//! Every record lives in the `transfer` bucket keyed by its secret hash until
//! it reaches a terminal phase, then it moves to `transfer_archive`. All
//! writes go through the caller's [Transaction] so a record changes together
//! with the ledger mutation it depends on.

use prost::Message as _;
use tracing::{debug, info};

use crate::{
    locks::{self, Lock},
    packed::types::{Address, Hash},
    storage::{StorageError, Store, Transaction, TRANSFER_ARCHIVE_BUCKET, TRANSFER_BUCKET},
    wire::{ConversionError, StoredTransfer},
};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("{event} is not allowed for a {role:?} in phase {phase:?}")]
    InvalidTransition {
        role: Role,
        phase: Phase,
        event: &'static str,
    },
    #[error("a transfer with secret hash {0} already exists")]
    AlreadyExists(Hash),
    #[error("no transfer with secret hash {0}")]
    NotFound(Hash),
    #[error("secret does not match secret hash {0}")]
    WrongSecret(Hash),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("corrupt transfer record: {0}")]
    Corrupt(#[from] ConversionError),
    #[error("corrupt transfer record: {0}")]
    Decode(#[from] prost::DecodeError),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Mediator,
    Target,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    Pending,
    LockSent,
    LockReceived,
    SecretRequested,
    SecretRevealed,
    Unlocked,
    Completed,
    Cancelled,
    Expired,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::Completed | Phase::Cancelled | Phase::Expired | Phase::Failed
        )
    }
}

macro_rules! u32_enum {
    ($T:ident { $($variant:ident = $n:literal),* $(,)? }) => {
        impl From<$T> for u32 {
            fn from(value: $T) -> Self {
                match value {
                    $($T::$variant => $n,)*
                }
            }
        }

        impl TryFrom<u32> for $T {
            type Error = u32;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                match value {
                    $($n => Ok($T::$variant),)*
                    other => Err(other),
                }
            }
        }
    };
}

u32_enum!(Role {
    Initiator = 0,
    Mediator = 1,
    Target = 2,
});

u32_enum!(Phase {
    Pending = 0,
    LockSent = 1,
    LockReceived = 2,
    SecretRequested = 3,
    SecretRevealed = 4,
    Unlocked = 5,
    Completed = 6,
    Cancelled = 7,
    Expired = 8,
    Failed = 9,
});

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    LockSent,
    LockReceived,
    SecretRequested,
    SecretRevealed { secret: Hash },
    Unlocked,
    Completed,
    Cancel,
    Expire,
    Fail,
}

impl TransferEvent {
    fn name(&self) -> &'static str {
        match self {
            TransferEvent::LockSent => "LockSent",
            TransferEvent::LockReceived => "LockReceived",
            TransferEvent::SecretRequested => "SecretRequested",
            TransferEvent::SecretRevealed { .. } => "SecretRevealed",
            TransferEvent::Unlocked => "Unlocked",
            TransferEvent::Completed => "Completed",
            TransferEvent::Cancel => "Cancel",
            TransferEvent::Expire => "Expire",
            TransferEvent::Fail => "Fail",
        }
    }
}

/// Phase reached by `event`, `None` if the event is illegal for `role` in
/// `phase`.
pub fn next_phase(role: Role, phase: Phase, event: &TransferEvent) -> Option<Phase> {
    use Phase::*;
    use Role::*;

    if phase.is_terminal() {
        return None;
    }
    let next = match (event, role, phase) {
        (TransferEvent::LockSent, Initiator, Pending) => LockSent,
        (TransferEvent::LockSent, Mediator, LockReceived) => LockSent,
        (TransferEvent::LockReceived, Mediator | Target, Pending) => LockReceived,
        (TransferEvent::SecretRequested, Initiator, LockSent) => SecretRequested,
        (TransferEvent::SecretRequested, Target, LockReceived) => SecretRequested,
        (TransferEvent::SecretRevealed { .. }, Initiator, LockSent | SecretRequested) => {
            SecretRevealed
        }
        (TransferEvent::SecretRevealed { .. }, Mediator, LockSent) => SecretRevealed,
        (TransferEvent::SecretRevealed { .. }, Target, LockReceived | SecretRequested) => {
            SecretRevealed
        }
        (TransferEvent::Unlocked, _, SecretRevealed) => Unlocked,
        (TransferEvent::Completed, _, Unlocked) => Completed,
        (TransferEvent::Cancel, _, Pending) => Cancelled,
        // Once unlocked the value has moved and the lock no longer matters.
        (TransferEvent::Expire, _, p) if p != Unlocked => Expired,
        (TransferEvent::Fail, _, _) => Failed,
        _ => return None,
    };
    Some(next)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub secret_hash: Hash,
    pub role: Role,
    pub phase: Phase,
    /// Channel the lock arrived on, `None` for the initiator.
    pub payer_channel: Option<Hash>,
    /// Channel the lock leaves on, `None` for the target.
    pub payee_channel: Option<Hash>,
    pub lock: Lock,
    pub secret: Option<Hash>,
    pub initiator: Address,
    pub target: Address,
    pub reveal_timeout: u64,
}

impl TransferRecord {
    pub fn initiator(
        lock: Lock,
        secret: Hash,
        channel: Hash,
        initiator: Address,
        target: Address,
        reveal_timeout: u64,
    ) -> Self {
        Self {
            secret_hash: lock.secret_hash,
            role: Role::Initiator,
            phase: Phase::Pending,
            payer_channel: None,
            payee_channel: Some(channel),
            lock,
            secret: Some(secret),
            initiator,
            target,
            reveal_timeout,
        }
    }

    pub fn target(
        lock: Lock,
        channel: Hash,
        initiator: Address,
        target: Address,
        reveal_timeout: u64,
    ) -> Self {
        Self {
            secret_hash: lock.secret_hash,
            role: Role::Target,
            phase: Phase::Pending,
            payer_channel: Some(channel),
            payee_channel: None,
            lock,
            secret: None,
            initiator,
            target,
            reveal_timeout,
        }
    }

    /// Channels this transfer touches.
    pub fn channels(&self) -> impl Iterator<Item = Hash> {
        self.payer_channel.into_iter().chain(self.payee_channel)
    }

    fn encode(&self) -> Vec<u8> {
        StoredTransfer::from(self).encode_to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, TransferError> {
        Ok(StoredTransfer::decode(bytes)?.try_into()?)
    }
}

/// Persist a new record.
pub fn create<S: Store + ?Sized>(
    tx: &mut Transaction<'_, S>,
    record: &TransferRecord,
) -> Result<(), TransferError> {
    let key = record.secret_hash.0;
    if tx.get(TRANSFER_BUCKET, &key)?.is_some() {
        return Err(TransferError::AlreadyExists(record.secret_hash));
    }
    tx.set(TRANSFER_BUCKET, key, record.encode());
    debug!(secret_hash = ?record.secret_hash, role = ?record.role, "transfer created");
    Ok(())
}

/// Apply `event` to `record` and persist the result. Terminal records are
/// moved to the archive.
pub fn advance<S: Store + ?Sized>(
    tx: &mut Transaction<'_, S>,
    record: &TransferRecord,
    event: &TransferEvent,
) -> Result<TransferRecord, TransferError> {
    let phase = next_phase(record.role, record.phase, event).ok_or(
        TransferError::InvalidTransition {
            role: record.role,
            phase: record.phase,
            event: event.name(),
        },
    )?;

    let mut next = record.clone();
    next.phase = phase;
    if let TransferEvent::SecretRevealed { secret } = event {
        if locks::secret_hash(secret) != record.secret_hash {
            return Err(TransferError::WrongSecret(record.secret_hash));
        }
        next.secret = Some(*secret);
    }

    let key = next.secret_hash.0;
    if phase.is_terminal() {
        tx.delete(TRANSFER_BUCKET, key);
        tx.set(TRANSFER_ARCHIVE_BUCKET, key, next.encode());
        info!(secret_hash = ?next.secret_hash, phase = ?phase, "transfer finished");
    } else {
        tx.set(TRANSFER_BUCKET, key, next.encode());
        debug!(secret_hash = ?next.secret_hash, phase = ?phase, "transfer advanced");
    }
    Ok(next)
}

pub fn load<S: Store + ?Sized>(
    tx: &Transaction<'_, S>,
    secret_hash: &Hash,
) -> Result<Option<TransferRecord>, TransferError> {
    tx.get(TRANSFER_BUCKET, &secret_hash.0)?
        .map(|bytes| TransferRecord::decode(&bytes))
        .transpose()
}

pub fn load_archived<S: Store + ?Sized>(
    store: &S,
    secret_hash: &Hash,
) -> Result<Option<TransferRecord>, TransferError> {
    store
        .get(TRANSFER_ARCHIVE_BUCKET, &secret_hash.0)?
        .map(|bytes| TransferRecord::decode(&bytes))
        .transpose()
}

/// Records that have not reached a terminal phase.
pub fn list_unfinished<S: Store + ?Sized>(store: &S) -> Result<Vec<TransferRecord>, TransferError> {
    store
        .all(TRANSFER_BUCKET)?
        .iter()
        .map(|(_, bytes)| TransferRecord::decode(bytes))
        .collect()
}

/// Move every unfinished record whose lock expired at `block` to
/// [Phase::Expired].
pub fn expire_stalled<S: Store + ?Sized>(
    tx: &mut Transaction<'_, S>,
    block: u64,
) -> Result<Vec<TransferRecord>, TransferError> {
    expire_where(tx, block, |_| true)
}

/// [expire_stalled] restricted to transfers touching `channel_id`.
pub fn expire_stalled_on<S: Store + ?Sized>(
    tx: &mut Transaction<'_, S>,
    block: u64,
    channel_id: Hash,
) -> Result<Vec<TransferRecord>, TransferError> {
    expire_where(tx, block, |record| record.channels().any(|c| c == channel_id))
}

fn expire_where<S, F>(
    tx: &mut Transaction<'_, S>,
    block: u64,
    filter: F,
) -> Result<Vec<TransferRecord>, TransferError>
where
    S: Store + ?Sized,
    F: Fn(&TransferRecord) -> bool,
{
    let mut expired = Vec::new();
    for (_, bytes) in tx.all_of(TRANSFER_BUCKET)? {
        let record = TransferRecord::decode(&bytes)?;
        if !record.lock.is_expired(block) || !filter(&record) {
            continue;
        }
        if next_phase(record.role, record.phase, &TransferEvent::Expire).is_none() {
            continue;
        }
        expired.push(advance(tx, &record, &TransferEvent::Expire)?);
    }
    Ok(expired)
}

/// Mark the unfinished transfers locked by `secret_hashes` as failed.
/// Unknown or finished ones are skipped.
pub fn fail<S: Store + ?Sized>(
    tx: &mut Transaction<'_, S>,
    secret_hashes: &[Hash],
) -> Result<Vec<TransferRecord>, TransferError> {
    let mut failed = Vec::new();
    for secret_hash in secret_hashes {
        if let Some(record) = load(tx, secret_hash)? {
            failed.push(advance(tx, &record, &TransferEvent::Fail)?);
        }
    }
    Ok(failed)
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecretRegistrationPlan {
    pub register_on_chain: Vec<Hash>,
    /// Left for the partner to unlock cooperatively.
    pub resolve_off_chain: Vec<Hash>,
}

/// Register at most `cap` secrets on-chain, in the given order.
pub fn plan_secret_registration(secrets: &[Hash], cap: usize) -> SecretRegistrationPlan {
    let split = secrets.len().min(cap);
    SecretRegistrationPlan {
        register_on_chain: secrets[..split].to_vec(),
        resolve_off_chain: secrets[split..].to_vec(),
    }
}
