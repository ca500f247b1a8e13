//! Hash-time locks and the merkle commitment over them.
//!
//! Every balance proof commits to the set of pending locks of its sender via
//! the locks root. The tree is built over the lock hashes ordered by secret
//! hash, hashing each pair with the smaller node first, so the root only
//! depends on the set and not on insertion order.

use std::collections::BTreeMap;

use crate::packed::{
    keccak256,
    types::{Hash, U256},
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LockError {
    #[error("a pending lock with secret hash {0} already exists")]
    DuplicateLock(Hash),
    #[error("lock {secret_hash} expires at block {expiration}, current block is {block}")]
    LockExpired {
        secret_hash: Hash,
        expiration: u64,
        block: u64,
    },
    #[error("no pending lock with secret hash {0}")]
    LockNotFound(Hash),
    #[error("merkle proof length {0} is not a multiple of 32")]
    MalformedProof(usize),
}

/// Hash of a secret, which identifies a lock and the transfer using it.
pub fn secret_hash(secret: &Hash) -> Hash {
    keccak256(&[&secret.0])
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Lock {
    pub secret_hash: Hash,
    pub amount: U256,
    pub expiration: u64,
}

impl Lock {
    /// Merkle leaf: `keccak256(expiration(32) ‖ amount(32) ‖ secret_hash)`.
    pub fn hash(&self) -> Hash {
        let expiration = U256::from(self.expiration).to_be_bytes();
        keccak256(&[&expiration, &self.amount.to_be_bytes(), &self.secret_hash.0])
    }

    pub fn is_expired(&self, block: u64) -> bool {
        self.expiration <= block
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PendingLock {
    pub lock: Lock,
    pub secret: Option<Hash>,
}

fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    if a <= b {
        keccak256(&[&a.0, &b.0])
    } else {
        keccak256(&[&b.0, &a.0])
    }
}

/// Sibling hashes from the leaf up to (excluding) the root.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MerkleProof {
    pub elements: Vec<Hash>,
}

impl MerkleProof {
    /// Concatenated 32-byte siblings, the form the contract takes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.elements.iter().flat_map(|h| h.0).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LockError> {
        if bytes.len() % Hash::LEN != 0 {
            return Err(LockError::MalformedProof(bytes.len()));
        }
        let elements = bytes
            .chunks_exact(Hash::LEN)
            .filter_map(Hash::from_slice)
            .collect();
        Ok(Self { elements })
    }

    pub fn verify(&self, root: Hash, lock: &Lock) -> bool {
        let computed = self
            .elements
            .iter()
            .fold(lock.hash(), |node, sibling| hash_pair(&node, sibling));
        computed == root
    }
}

/// Pending locks of one direction of a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockRegistry {
    locks: BTreeMap<Hash, PendingLock>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted entries.
    pub fn restore(pending: impl IntoIterator<Item = PendingLock>) -> Self {
        Self {
            locks: pending
                .into_iter()
                .map(|p| (p.lock.secret_hash, p))
                .collect(),
        }
    }

    /// Add a lock. A lock whose secret hash is already taken by an expired
    /// lock replaces it.
    pub fn add_lock(&mut self, lock: Lock, current_block: u64) -> Result<(), LockError> {
        if lock.is_expired(current_block) {
            return Err(LockError::LockExpired {
                secret_hash: lock.secret_hash,
                expiration: lock.expiration,
                block: current_block,
            });
        }
        if let Some(existing) = self.locks.get(&lock.secret_hash) {
            if !existing.lock.is_expired(current_block) {
                return Err(LockError::DuplicateLock(lock.secret_hash));
            }
        }
        self.locks
            .insert(lock.secret_hash, PendingLock { lock, secret: None });
        Ok(())
    }

    pub fn remove_lock(&mut self, secret_hash: &Hash) -> Result<Lock, LockError> {
        self.locks
            .remove(secret_hash)
            .map(|p| p.lock)
            .ok_or(LockError::LockNotFound(*secret_hash))
    }

    /// Remove the lock opened by `secret`.
    pub fn unlock(&mut self, secret: &Hash) -> Result<Lock, LockError> {
        self.remove_lock(&secret_hash(secret))
    }

    /// Remember the secret of a pending lock. Returns false if no lock uses
    /// it.
    pub fn reveal_secret(&mut self, secret: Hash) -> bool {
        match self.locks.get_mut(&secret_hash(&secret)) {
            Some(pending) => {
                pending.secret = Some(secret);
                true
            }
            None => false,
        }
    }

    /// Locks whose secret is known, with that secret.
    pub fn revealed(&self) -> impl Iterator<Item = (&Lock, &Hash)> {
        self.locks
            .values()
            .filter_map(|p| p.secret.as_ref().map(|s| (&p.lock, s)))
    }

    /// Drop every lock that expired at `confirmed_block`. Never called
    /// implicitly, expired locks stay part of the root until then.
    pub fn prune_expired(&mut self, confirmed_block: u64) -> Vec<Lock> {
        let expired: Vec<Hash> = self
            .locks
            .values()
            .filter(|p| p.lock.is_expired(confirmed_block))
            .map(|p| p.lock.secret_hash)
            .collect();
        expired
            .iter()
            .filter_map(|h| self.locks.remove(h))
            .map(|p| p.lock)
            .collect()
    }

    pub fn get(&self, secret_hash: &Hash) -> Option<&PendingLock> {
        self.locks.get(secret_hash)
    }

    pub fn contains(&self, secret_hash: &Hash) -> bool {
        self.locks.contains_key(secret_hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingLock> {
        self.locks.values()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn locked_amount(&self) -> U256 {
        self.locks
            .values()
            .fold(U256::zero(), |acc, p| acc.saturating_add(p.lock.amount))
    }

    fn leaves(&self) -> Vec<Hash> {
        self.locks.values().map(|p| p.lock.hash()).collect()
    }

    fn next_layer(layer: &[Hash]) -> Vec<Hash> {
        layer
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => hash_pair(a, b),
                _ => pair[0],
            })
            .collect()
    }

    pub fn compute_root(&self) -> Hash {
        let mut layer = self.leaves();
        if layer.is_empty() {
            return Hash::ZERO;
        }
        while layer.len() > 1 {
            layer = Self::next_layer(&layer);
        }
        layer[0]
    }

    pub fn prove_inclusion(&self, secret_hash: &Hash) -> Result<MerkleProof, LockError> {
        let mut index = self
            .locks
            .keys()
            .position(|k| k == secret_hash)
            .ok_or(LockError::LockNotFound(*secret_hash))?;

        let mut layer = self.leaves();
        let mut elements = Vec::new();
        while layer.len() > 1 {
            let sibling = index ^ 1;
            // The last node of an odd layer is promoted and has no sibling.
            if let Some(h) = layer.get(sibling) {
                elements.push(*h);
            }
            layer = Self::next_layer(&layer);
            index /= 2;
        }
        Ok(MerkleProof { elements })
    }
}

#[cfg(test)]
mod tests;
