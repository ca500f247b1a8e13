//! Idempotency ledger for inbound messages.
//!
//! The response to every processed message is stored under its echo hash in
//! the same transaction as the effects of processing it, together with the
//! messages that processing sent back to the sender. A retransmitted message
//! finds the stored record and is answered without being applied again, and
//! the replies go out once more in case the first copies were lost.

use prost::Message as _;
use tracing::trace;

use crate::{
    packed::{
        keccak256,
        types::{Address, Hash},
    },
    storage::{StorageError, Store, Transaction, ACK_BUCKET},
    wire::StoredAck,
};

/// `keccak256(message ‖ sender)`.
pub fn echo_hash(message: &[u8], sender: &Address) -> Hash {
    keccak256(&[message, &sender.0])
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AckRecord {
    /// Returned to the caller of `on_receive`.
    pub response: Vec<u8>,
    /// Encoded messages sent to the sender while processing.
    pub replies: Vec<Vec<u8>>,
}

impl From<&AckRecord> for StoredAck {
    fn from(value: &AckRecord) -> Self {
        Self {
            response: value.response.clone(),
            replies: value.replies.clone(),
        }
    }
}

impl From<StoredAck> for AckRecord {
    fn from(value: StoredAck) -> Self {
        Self {
            response: value.response,
            replies: value.replies,
        }
    }
}

fn decode(echo_hash: &Hash, found: Option<Vec<u8>>) -> Result<Option<AckRecord>, StorageError> {
    let Some(bytes) = found else {
        return Ok(None);
    };
    trace!(?echo_hash, "ack hit");
    let stored = StoredAck::decode(bytes.as_slice()).map_err(|e| StorageError::Corrupt {
        bucket: ACK_BUCKET,
        reason: e.to_string(),
    })?;
    Ok(Some(stored.into()))
}

pub fn get<S: Store + ?Sized>(store: &S, echo_hash: &Hash) -> Result<Option<AckRecord>, StorageError> {
    decode(echo_hash, store.get(ACK_BUCKET, &echo_hash.0)?)
}

/// Like [get], but sees writes of `tx` that are not committed yet.
pub fn get_in<S: Store + ?Sized>(
    tx: &Transaction<'_, S>,
    echo_hash: &Hash,
) -> Result<Option<AckRecord>, StorageError> {
    decode(echo_hash, tx.get(ACK_BUCKET, &echo_hash.0)?)
}

pub fn put<S: Store + ?Sized>(tx: &mut Transaction<'_, S>, echo_hash: &Hash, record: &AckRecord) {
    tx.set(ACK_BUCKET, echo_hash.0, StoredAck::from(record).encode_to_vec());
}
