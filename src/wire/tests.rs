use prost::Message as _;

use super::*;
use crate::{
    chain::ChainEvent,
    channel::{ChannelIdentity, ChannelLedger, ChannelState},
    locks::secret_hash,
    sig::Signer,
    transfer::{Phase, TransferRecord},
};

fn signer(n: u8) -> Signer {
    let mut secret = [0u8; 32];
    secret[31] = n;
    Signer::from_secret_bytes(&secret).unwrap()
}

fn binding() -> ChannelBinding {
    ChannelBinding {
        channel_id: Hash([0xc1; 32]),
        open_block: 50,
        chain_id: U256::from(1u64),
    }
}

fn signed_proof() -> SignedBalanceProof {
    let proof = BalanceProof {
        transferred_amount: U256::from(30u64),
        locks_root: Hash([0x10; 32]),
        nonce: 3,
        additional_hash: Hash::ZERO,
        binding: binding(),
    };
    SignedBalanceProof::new(proof, &signer(1)).unwrap()
}

#[test]
fn messages_survive_the_envelope() {
    let lock = Lock {
        secret_hash: secret_hash(&Hash([0x5e; 32])),
        amount: U256::from(20u64),
        expiration: 180,
    };
    let request = WithdrawRequest {
        payload: Withdraw1 {
            participant1: signer(1).address(),
            deposit1: U256::from(100u64),
            participant2: signer(2).address(),
            deposit2: U256::from(50u64),
            withdraw1: U256::from(10u64),
            binding: binding(),
        },
        signature: Signature([7; 65]),
        deadline: 120,
    };

    let messages = [
        Message::DirectTransfer {
            proof: signed_proof(),
        },
        Message::LockedTransfer {
            proof: signed_proof(),
            lock,
            initiator: Address([1; 20]),
            target: Address([2; 20]),
        },
        Message::SecretRequest {
            channel_id: Hash([0xc1; 32]),
            secret_hash: lock.secret_hash,
            amount: lock.amount,
        },
        Message::RevealSecret {
            channel_id: Hash([0xc1; 32]),
            secret: Hash([0x5e; 32]),
        },
        Message::Unlock {
            proof: signed_proof(),
            secret: Hash([0x5e; 32]),
        },
        Message::RemoveExpiredLock {
            proof: signed_proof(),
            secret_hash: lock.secret_hash,
        },
        Message::WithdrawRequest(request),
        Message::WithdrawResponse {
            channel_id: Hash([0xc1; 32]),
            signature: Signature([8; 65]),
        },
        Message::CooperativeSettleRequest {
            channel_id: Hash([0xc1; 32]),
            signature: Signature([9; 65]),
        },
        Message::CooperativeSettleResponse {
            channel_id: Hash([0xc1; 32]),
            signature: Signature([10; 65]),
        },
        Message::Ack {
            echo_hash: Hash([0xec; 32]),
        },
    ];

    for message in messages {
        let decoded = Message::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }
}

#[test]
fn decoded_proof_still_verifies() {
    let message = Message::DirectTransfer {
        proof: signed_proof(),
    };
    match Message::decode(&message.encode()).unwrap() {
        Message::DirectTransfer { proof } => {
            proof.ensure_signed_by(signer(1).address()).unwrap();
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[test]
fn channel_id_of_messages() {
    assert_eq!(
        Message::DirectTransfer {
            proof: signed_proof()
        }
        .channel_id(),
        Some(Hash([0xc1; 32]))
    );
    assert_eq!(
        Message::Ack {
            echo_hash: Hash::ZERO
        }
        .channel_id(),
        None
    );
}

#[test]
fn empty_envelope_is_rejected() {
    let bytes = Envelope { msg: None }.encode_to_vec();
    assert!(matches!(
        Message::decode(&bytes),
        Err(ConversionError::ExpectedSome("msg"))
    ));
}

#[test]
fn garbage_is_rejected() {
    assert!(matches!(
        Message::decode(&[0xff, 0xff, 0xff]),
        Err(ConversionError::Decode(_))
    ));
}

#[test]
fn short_fields_are_rejected() {
    let mut msg = BalanceProofMsg::from(signed_proof());
    msg.signature.truncate(64);
    assert!(matches!(
        SignedBalanceProof::try_from(msg),
        Err(ConversionError::ByteLengthMismatch("signature"))
    ));

    let bytes = Envelope {
        msg: Some(envelope::Msg::DirectTransfer(DirectTransferMsg { proof: None })),
    }
    .encode_to_vec();
    assert!(matches!(
        Message::decode(&bytes),
        Err(ConversionError::ExpectedSome("proof"))
    ));
}

#[test]
fn amount_wider_than_256_bits_is_rejected() {
    let mut msg = LockMsg::from(Lock {
        secret_hash: Hash([1; 32]),
        amount: U256::from(5u64),
        expiration: 10,
    });
    msg.amount = vec![1; 33];
    assert!(matches!(
        Lock::try_from(msg),
        Err(ConversionError::ByteLengthMismatch("amount"))
    ));
}

#[test]
fn ledger_record_restores_the_ledger() {
    let alice = signer(1);
    let bob = signer(2);
    let identity = ChannelIdentity::new(
        alice.address(),
        bob.address(),
        Address([0x70; 20]),
        50,
        40,
        U256::from(1u64),
    );
    let mut ledger = ChannelLedger::new(identity, alice.address()).unwrap();
    ledger
        .apply_chain_event(&ChainEvent::Opened { block: 50 })
        .unwrap();
    ledger
        .apply_chain_event(&ChainEvent::Deposited {
            participant: alice.address(),
            total_deposit: U256::from(100u64),
        })
        .unwrap();
    let lock = Lock {
        secret_hash: secret_hash(&Hash([0x5e; 32])),
        amount: U256::from(20u64),
        expiration: 180,
    };
    ledger
        .apply_local_transfer(U256::from(30u64), None, 100, &alice)
        .unwrap();
    ledger
        .apply_local_transfer(U256::from(20u64), Some(lock), 100, &alice)
        .unwrap();
    ledger.reveal_secret(Hash([0x5e; 32]));

    let stored = StoredChannel::from(&ledger);
    let bytes = stored.encode_to_vec();
    let restored = ChannelLedger::try_from(StoredChannel::decode(bytes.as_slice()).unwrap()).unwrap();

    assert_eq!(restored, ledger);
    assert_eq!(restored.state(), ChannelState::Opened);
    assert_eq!(restored.our().locks.compute_root(), ledger.our().locks_root());
}

#[test]
fn unknown_state_is_rejected() {
    let alice = signer(1);
    let identity = ChannelIdentity::new(
        alice.address(),
        signer(2).address(),
        Address([0x70; 20]),
        50,
        40,
        U256::from(1u64),
    );
    let ledger = ChannelLedger::new(identity, alice.address()).unwrap();
    let mut stored = StoredChannel::from(&ledger);
    stored.state = 9;
    assert!(matches!(
        ChannelLedger::try_from(stored),
        Err(ConversionError::UnknownValue("state", 9))
    ));
}

#[test]
fn transfer_record_keeps_optional_fields() {
    let lock = Lock {
        secret_hash: secret_hash(&Hash([0x5e; 32])),
        amount: U256::from(20u64),
        expiration: 180,
    };
    let record = TransferRecord::target(lock, Hash([0xc1; 32]), Address([1; 20]), Address([2; 20]), 10);
    let restored = TransferRecord::try_from(StoredTransfer::from(&record)).unwrap();

    assert_eq!(restored, record);
    assert_eq!(restored.phase, Phase::Pending);
    assert_eq!(restored.payee_channel, None);
    assert_eq!(restored.secret, None);
}
