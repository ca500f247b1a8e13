use super::*;
use proptest::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn lock(n: u8, amount: u64, expiration: u64) -> (Hash, Lock) {
    let secret = Hash([n; 32]);
    let lock = Lock {
        secret_hash: secret_hash(&secret),
        amount: U256::from(amount),
        expiration,
    };
    (secret, lock)
}

fn registry_with(n: u8) -> (LockRegistry, Vec<Lock>) {
    let mut reg = LockRegistry::new();
    let locks: Vec<Lock> = (1..=n).map(|i| lock(i, i as u64, 100).1).collect();
    for l in &locks {
        reg.add_lock(*l, 10).unwrap();
    }
    (reg, locks)
}

#[test]
fn lock_hash_layout() {
    let (_, l) = lock(1, 20, 500);
    let mut expiration = [0u8; 32];
    expiration[30..].copy_from_slice(&500u16.to_be_bytes());
    let mut amount = [0u8; 32];
    amount[31] = 20;
    assert_eq!(l.hash(), keccak256(&[&expiration, &amount, &l.secret_hash.0]));
}

#[test]
fn empty_root_is_zero() {
    assert_eq!(LockRegistry::new().compute_root(), Hash::ZERO);
}

#[test]
fn single_lock_root_is_its_leaf() {
    let (reg, locks) = registry_with(1);
    assert_eq!(reg.compute_root(), locks[0].hash());
    assert!(reg.prove_inclusion(&locks[0].secret_hash).unwrap().elements.is_empty());
}

#[test]
fn two_locks_hash_smaller_first() {
    let (reg, locks) = registry_with(2);
    let (a, b) = (locks[0].hash(), locks[1].hash());
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    assert_eq!(reg.compute_root(), keccak256(&[&lo.0, &hi.0]));
}

#[test]
fn root_returns_after_unlock() {
    let (mut reg, _) = registry_with(3);
    let before = reg.compute_root();

    let (secret, l) = lock(42, 20, 100);
    reg.add_lock(l, 10).unwrap();
    assert_ne!(reg.compute_root(), before);
    assert_eq!(reg.locked_amount(), U256::from(1 + 2 + 3 + 20u64));

    assert_eq!(reg.unlock(&secret).unwrap(), l);
    assert_eq!(reg.compute_root(), before);
}

#[test]
fn duplicate_and_expired_locks_are_rejected() {
    let mut reg = LockRegistry::new();
    let (_, l) = lock(1, 5, 100);
    reg.add_lock(l, 10).unwrap();
    assert_eq!(reg.add_lock(l, 10), Err(LockError::DuplicateLock(l.secret_hash)));

    let (_, stale) = lock(2, 5, 10);
    assert_eq!(
        reg.add_lock(stale, 10),
        Err(LockError::LockExpired {
            secret_hash: stale.secret_hash,
            expiration: 10,
            block: 10
        })
    );
}

#[test]
fn expired_lock_is_replaced() {
    let mut reg = LockRegistry::new();
    let (_, old) = lock(1, 5, 20);
    reg.add_lock(old, 10).unwrap();

    let renewed = Lock {
        expiration: 80,
        ..old
    };
    reg.add_lock(renewed, 30).unwrap();
    assert_eq!(reg.len(), 1);
    assert_eq!(reg.get(&old.secret_hash).unwrap().lock, renewed);
}

#[test]
fn unknown_lock_is_not_found() {
    let (mut reg, _) = registry_with(2);
    let missing = Hash([0xee; 32]);
    assert_eq!(reg.remove_lock(&missing), Err(LockError::LockNotFound(missing)));
    assert_eq!(
        reg.prove_inclusion(&missing),
        Err(LockError::LockNotFound(missing))
    );
}

#[test]
fn proofs_verify_for_every_size() {
    for n in 1..=9 {
        let (reg, locks) = registry_with(n);
        let root = reg.compute_root();
        for l in &locks {
            let proof = reg.prove_inclusion(&l.secret_hash).unwrap();
            assert!(proof.verify(root, l), "size {} lock {:?}", n, l);

            let decoded = MerkleProof::from_bytes(&proof.to_bytes()).unwrap();
            assert_eq!(decoded, proof);
        }
    }
}

#[test]
fn proof_rejects_foreign_lock() {
    let (reg, locks) = registry_with(4);
    let proof = reg.prove_inclusion(&locks[0].secret_hash).unwrap();
    let (_, other) = lock(99, 1, 100);
    assert!(!proof.verify(reg.compute_root(), &other));

    let tampered = Lock {
        amount: U256::from(1000u64),
        ..locks[0]
    };
    assert!(!proof.verify(reg.compute_root(), &tampered));
}

#[test]
fn malformed_proof_bytes() {
    assert_eq!(
        MerkleProof::from_bytes(&[0u8; 33]),
        Err(LockError::MalformedProof(33))
    );
}

#[test]
fn reveal_and_prune() {
    let mut reg = LockRegistry::new();
    let (s1, l1) = lock(1, 5, 50);
    let (_, l2) = lock(2, 7, 200);
    reg.add_lock(l1, 10).unwrap();
    reg.add_lock(l2, 10).unwrap();

    assert!(reg.reveal_secret(s1));
    assert!(!reg.reveal_secret(Hash([9; 32])));
    let revealed: Vec<_> = reg.revealed().map(|(l, s)| (*l, *s)).collect();
    assert_eq!(revealed, vec![(l1, s1)]);

    // Expired locks stay until explicitly pruned.
    let root = reg.compute_root();
    assert_eq!(reg.compute_root(), root);
    assert_eq!(reg.prune_expired(50), vec![l1]);
    assert_eq!(reg.len(), 1);
    assert_eq!(reg.compute_root(), l2.hash());
}

fn shuffled(seed: u64, mut locks: Vec<Lock>) -> Vec<Lock> {
    let mut rng = StdRng::seed_from_u64(seed);
    for i in (1..locks.len()).rev() {
        let j = rng.gen_range(0..=i);
        locks.swap(i, j);
    }
    locks
}

proptest! {
    #[test]
    fn prop_root_is_permutation_invariant(
        amounts in prop::collection::vec(1u64..1_000_000, 0..24),
        seed in any::<u64>(),
    ) {
        let locks: Vec<Lock> = amounts
            .iter()
            .enumerate()
            .map(|(i, a)| Lock {
                secret_hash: secret_hash(&Hash([i as u8; 32])),
                amount: U256::from(*a),
                expiration: 1000 + *a,
            })
            .collect();

        let mut ordered = LockRegistry::new();
        for l in &locks {
            ordered.add_lock(*l, 0).unwrap();
        }
        let mut permuted = LockRegistry::new();
        for l in shuffled(seed, locks.clone()) {
            permuted.add_lock(l, 0).unwrap();
        }

        let root = ordered.compute_root();
        prop_assert_eq!(root, permuted.compute_root());
        for l in &locks {
            let proof = permuted.prove_inclusion(&l.secret_hash).unwrap();
            prop_assert!(proof.verify(root, l));
        }
    }
}
