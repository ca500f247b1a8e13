use super::*;
use crate::{
    chain::ChainEvent,
    channel::{BalanceChange, ChannelIdentity},
    locks::{secret_hash, Lock},
    packed::types::{Address, U256},
    sig::Signer,
};

const SETTLE_TIMEOUT: u64 = 40;
const CLOSED_AT: u64 = 100;
const SETTLE_BLOCK: u64 = CLOSED_AT + SETTLE_TIMEOUT;
const SECRET: Hash = Hash([0x5e; 32]);

fn signer(n: u8) -> Signer {
    let mut secret = [0u8; 32];
    secret[31] = n;
    Signer::from_secret_bytes(&secret).unwrap()
}

fn config() -> Config {
    Config {
        settle_timeout: SETTLE_TIMEOUT,
        ..Config::default()
    }
}

/// Alice's and Bob's view of a channel where both deposited 100.
fn open() -> (Signer, Signer, ChannelLedger, ChannelLedger) {
    let alice = signer(1);
    let bob = signer(2);
    let identity = ChannelIdentity::new(
        alice.address(),
        bob.address(),
        Address([0x70; 20]),
        50,
        SETTLE_TIMEOUT,
        U256::one(),
    );
    let mut a = ChannelLedger::new(identity, alice.address()).unwrap();
    let mut b = ChannelLedger::new(identity, bob.address()).unwrap();
    for ledger in [&mut a, &mut b] {
        ledger
            .apply_chain_event(&ChainEvent::Opened { block: 50 })
            .unwrap();
        for who in [alice.address(), bob.address()] {
            ledger
                .apply_chain_event(&ChainEvent::Deposited {
                    participant: who,
                    total_deposit: 100u64.into(),
                })
                .unwrap();
        }
    }
    (alice, bob, a, b)
}

/// Bob locks 20 to Alice, Alice learns the secret.
fn with_partner_lock(expiration: u64) -> (Signer, ChannelLedger) {
    let (alice, bob, mut a, mut b) = open();
    let lock = Lock {
        secret_hash: secret_hash(&SECRET),
        amount: 20u64.into(),
        expiration,
    };
    let signed = b
        .apply_local_transfer(20u64.into(), Some(lock), 90, &bob)
        .unwrap();
    a.apply_remote_balance_proof(&signed, &BalanceChange::Lock(lock), 90)
        .unwrap();
    assert!(a.reveal_secret(SECRET));
    (alice, a)
}

fn close(ledger: &mut ChannelLedger, closer: Address, recorded_nonce: u64) {
    ledger
        .apply_chain_event(&ChainEvent::Closed {
            closing_participant: closer,
            block: CLOSED_AT,
            recorded_nonce,
        })
        .unwrap();
}

fn kinds(actions: &[Action]) -> Vec<CallKind> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Submit(call) => Some(call.kind()),
            _ => None,
        })
        .collect()
}

#[test]
fn settle_waits_for_settle_timeout() {
    let (alice, _, mut a, _) = open();
    close(&mut a, alice.address(), 0);

    assert!(kinds(&schedule(&config(), &a, SETTLE_BLOCK - 1)).is_empty());
    assert_eq!(
        kinds(&schedule(&config(), &a, SETTLE_BLOCK)),
        vec![CallKind::Settle]
    );
}

#[test]
fn update_is_sent_while_partner_close_is_stale() {
    let (alice, bob, mut a, mut b) = open();
    let signed = b
        .apply_local_transfer(10u64.into(), None, 90, &bob)
        .unwrap();
    a.apply_remote_balance_proof(&signed, &BalanceChange::Direct, 90)
        .unwrap();
    close(&mut a, bob.address(), 0);

    assert_eq!(
        kinds(&schedule(&config(), &a, CLOSED_AT + 1)),
        vec![CallKind::UpdateBalanceProof]
    );
    // Too late once settling is possible.
    assert_eq!(
        kinds(&schedule(&config(), &a, SETTLE_BLOCK)),
        vec![CallKind::Settle]
    );

    a.apply_chain_event(&ChainEvent::BalanceProofUpdated {
        closing_participant: bob.address(),
        nonce: 1,
    })
    .unwrap();
    assert!(kinds(&schedule(&config(), &a, CLOSED_AT + 2)).is_empty());

    // Nothing to update when we closed ourselves.
    let (_, _, mut own, _) = open();
    close(&mut own, alice.address(), 0);
    assert!(kinds(&schedule(&config(), &own, CLOSED_AT + 1)).is_empty());
}

#[test]
fn registered_locks_are_unlocked_before_settle() {
    let (alice, mut a) = with_partner_lock(180);
    close(&mut a, alice.address(), 1);

    let actions = schedule(&config(), &a, CLOSED_AT + 1);
    assert_eq!(
        actions,
        vec![Action::Submit(ChainCall::RegisterSecret {
            secrets: vec![SECRET]
        })]
    );

    a.apply_chain_event(&ChainEvent::SecretRegistered {
        secret: SECRET,
        block: CLOSED_AT + 2,
    })
    .unwrap();
    assert!(kinds(&schedule(&config(), &a, CLOSED_AT + 3)).contains(&CallKind::Unlock(secret_hash(&SECRET))));
    assert_eq!(
        kinds(&schedule(&config(), &a, SETTLE_BLOCK)),
        vec![CallKind::Unlock(secret_hash(&SECRET))],
        "settle waits for the unlock"
    );

    let deadline = unlock_deadline(&config(), &a).unwrap();
    assert_eq!(deadline, SETTLE_BLOCK + config().punish_blocks);
    assert_eq!(
        kinds(&schedule(&config(), &a, deadline)),
        vec![CallKind::Settle],
        "settle no longer waits after the unlock deadline"
    );
}

#[test]
fn confirmed_unlock_lets_settle_through() {
    let (alice, mut a) = with_partner_lock(180);
    close(&mut a, alice.address(), 1);
    a.apply_chain_event(&ChainEvent::SecretRegistered {
        secret: SECRET,
        block: CLOSED_AT + 2,
    })
    .unwrap();
    a.apply_chain_event(&ChainEvent::Unlocked {
        sender: signer(2).address(),
        secret_hash: secret_hash(&SECRET),
    })
    .unwrap();

    assert_eq!(
        kinds(&schedule(&config(), &a, SETTLE_BLOCK)),
        vec![CallKind::Settle]
    );
}

#[test]
fn expired_locks_fail_after_unlock_deadline() {
    let (alice, mut a) = with_partner_lock(120);
    close(&mut a, alice.address(), 1);
    let deadline = unlock_deadline(&config(), &a).unwrap();

    let actions = schedule(&config(), &a, deadline);
    assert!(actions.contains(&Action::FailTransfers {
        channel_id: a.channel_id(),
        secret_hashes: vec![secret_hash(&SECRET)],
    }));

    a.prune_expired_locks(deadline);
    assert!(!schedule(&config(), &a, deadline + 1)
        .iter()
        .any(|action| matches!(action, Action::FailTransfers { .. })));
}

#[test]
fn unexpired_locks_fail_after_unlock_deadline() {
    let (alice, mut a) = with_partner_lock(SETTLE_BLOCK + 1000);
    close(&mut a, alice.address(), 1);
    let deadline = unlock_deadline(&config(), &a).unwrap();

    let actions = schedule(&config(), &a, deadline + 1);
    assert!(actions.contains(&Action::FailTransfers {
        channel_id: a.channel_id(),
        secret_hashes: vec![secret_hash(&SECRET)],
    }));

    assert_eq!(a.abandon_locks(&[secret_hash(&SECRET)]).len(), 1);
    assert!(a.partner().locks.is_empty());
    assert_eq!(
        kinds(&schedule(&config(), &a, deadline + 2)),
        vec![CallKind::Settle]
    );
}

#[test]
fn nothing_is_registered_without_a_cap() {
    let (alice, mut a) = with_partner_lock(180);
    close(&mut a, alice.address(), 1);
    let config = Config {
        secret_registration_cap: 0,
        ..config()
    };
    assert!(schedule(&config, &a, CLOSED_AT + 1).is_empty());
}

#[test]
fn open_channel_registers_secret_close_to_expiry() {
    let (_, a) = with_partner_lock(180);
    let reveal_timeout = config().reveal_timeout;

    assert!(schedule(&config(), &a, 180 - reveal_timeout - 1).is_empty());
    assert_eq!(
        schedule(&config(), &a, 180 - reveal_timeout),
        vec![Action::Submit(ChainCall::RegisterSecret {
            secrets: vec![SECRET]
        })]
    );
}

#[test]
fn registration_is_capped() {
    let (alice, bob, mut a, mut b) = open();
    let secrets = [Hash([1; 32]), Hash([2; 32]), Hash([3; 32])];
    for secret in secrets {
        let lock = Lock {
            secret_hash: secret_hash(&secret),
            amount: 5u64.into(),
            expiration: 180,
        };
        let signed = b
            .apply_local_transfer(5u64.into(), Some(lock), 90, &bob)
            .unwrap();
        a.apply_remote_balance_proof(&signed, &BalanceChange::Lock(lock), 90)
            .unwrap();
        a.reveal_secret(secret);
    }
    close(&mut a, alice.address(), 3);

    let config = Config {
        secret_registration_cap: 2,
        ..config()
    };
    match &schedule(&config, &a, CLOSED_AT + 1)[..] {
        [Action::Submit(ChainCall::RegisterSecret { secrets })] => assert_eq!(secrets.len(), 2),
        other => panic!("unexpected actions {:?}", other),
    }
}

#[test]
fn withdraw_request_expires_after_deadline() {
    let (alice, _, mut a, _) = open();
    a.request_withdraw(10u64.into(), 120, &alice).unwrap();

    assert!(schedule(&config(), &a, 120).is_empty());
    assert_eq!(
        schedule(&config(), &a, 121),
        vec![Action::ExpireWithdraw {
            channel_id: a.channel_id()
        }]
    );
}

#[test]
fn settled_channels_need_nothing() {
    let (alice, _, mut a, _) = open();
    close(&mut a, alice.address(), 0);
    a.apply_chain_event(&ChainEvent::Settled {
        block: SETTLE_BLOCK,
    })
    .unwrap();
    assert!(schedule(&config(), &a, SETTLE_BLOCK + 100).is_empty());
}

#[test]
fn delegate_update_deadline() {
    let (_, bob, mut a, _) = open();
    assert_eq!(delegate_update_block(&config(), &a), None);
    close(&mut a, bob.address(), 0);
    assert_eq!(
        delegate_update_block(&config(), &a),
        Some(SETTLE_BLOCK - SETTLE_TIMEOUT / 2)
    );
}

#[test]
fn driver_does_not_resubmit_in_flight_calls() {
    let (alice, _, mut a, _) = open();
    close(&mut a, alice.address(), 0);
    let mut driver = Driver::new(config());

    let first = driver.on_block(SETTLE_BLOCK, &[&a]);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].0, a.channel_id());
    assert!(matches!(first[0].1, Action::Submit(ChainCall::Settle { .. })));
    assert!(driver.is_in_flight(a.channel_id(), CallKind::Settle));
    assert!(driver.on_block(SETTLE_BLOCK + 1, &[&a]).is_empty());

    driver.complete(a.channel_id(), CallKind::Settle);
    assert_eq!(driver.on_block(SETTLE_BLOCK + 2, &[&a]).len(), 1);
}
