use crate::packed::{
    keccak256,
    types::{Address, Hash, Signature},
};
use rand::{rngs::StdRng, SeedableRng};
use uint::hex::ToHex;

fn data() -> Hash {
    keccak256(&[&[0xa1, 0xa2, 0xa3, 0xa4]])
}

fn secret(last: u8) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[31] = last;
    bytes
}

macro_rules! make_known_address {
    ($name:ident, $signer:ty, $secret:literal, $address:literal) => {
        #[test]
        fn $name() {
            let signer = <$signer>::from_secret_bytes(&secret($secret)).unwrap();

            // Sanity check for macro user input
            assert_eq!($address.len(), 20 * 2);
            assert_eq!(signer.address().0.encode_hex::<String>(), $address);
        }
    };
}

macro_rules! make_a_to_b {
    ($name:ident, $signer:ty, $recover:path) => {
        #[test]
        fn $name() {
            // Do not use that on any real device, this is just for testing.
            let mut rng = StdRng::seed_from_u64(0);
            let signer = <$signer>::new(&mut rng);
            let msg = data();
            let sig = signer.sign(msg).unwrap();

            println!("Address: {}", signer.address().0.encode_hex::<String>());
            println!("Sig: 0x{}", sig.0.encode_hex::<String>());

            assert!(sig.0[64] == 27 || sig.0[64] == 28);
            let address = $recover(msg, sig).unwrap();
            assert_eq!(address, signer.address());
        }
    };
}

make_known_address!(
    k256_secret_one,
    super::k256::Signer,
    1,
    "7e5f4552091a69125d5dfcb7b8c2659029395bdf"
);
make_known_address!(
    k256_secret_two,
    super::k256::Signer,
    2,
    "2b5ad5c4795c026514f8317c7a215e218dccd6cf"
);

#[cfg(feature = "secp256k1")]
make_known_address!(
    secp256k1_secret_one,
    super::secp256k1::Signer,
    1,
    "7e5f4552091a69125d5dfcb7b8c2659029395bdf"
);

make_a_to_b!(
    k256_to_k256,
    super::k256::Signer,
    super::k256::recover_signer
);

#[cfg(feature = "secp256k1")]
make_a_to_b!(
    secp256k1_to_secp256k1,
    super::secp256k1::Signer,
    super::secp256k1::recover_signer
);

#[cfg(feature = "secp256k1")]
make_a_to_b!(
    secp256k1_to_k256,
    super::secp256k1::Signer,
    super::k256::recover_signer
);

#[cfg(feature = "secp256k1")]
make_a_to_b!(
    k256_to_secp256k1,
    super::k256::Signer,
    super::secp256k1::recover_signer
);

// Both backends use RFC 6979 nonces, so the same key must produce the same
// bytes.
#[cfg(feature = "secp256k1")]
#[test]
fn backends_agree() {
    let a = super::k256::Signer::from_secret_bytes(&secret(7)).unwrap();
    let b = super::secp256k1::Signer::from_secret_bytes(&secret(7)).unwrap();
    assert_eq!(a.address(), b.address());
    assert_eq!(a.sign(data()).unwrap(), b.sign(data()).unwrap());
}

#[test]
fn tampered_digest_recovers_someone_else() {
    let signer = super::Signer::from_secret_bytes(&secret(3)).unwrap();
    let sig = signer.sign(data()).unwrap();

    let other = keccak256(&[b"other"]);
    match super::recover_signer(other, sig) {
        Ok(addr) => assert_ne!(addr, signer.address()),
        Err(_) => {}
    }
}

#[test]
fn recovery_id_below_offset_is_rejected() {
    let signer = super::Signer::from_secret_bytes(&secret(3)).unwrap();
    let mut sig: Signature = signer.sign(data()).unwrap();
    sig.0[64] = 1;
    assert!(super::recover_signer(data(), sig).is_err());
}

#[test]
fn debug_does_not_leak_key() {
    let signer = super::Signer::from_secret_bytes(&secret(1)).unwrap();
    let printed = format!("{:?}", signer);
    assert!(printed.contains(&format!("{}", signer.address())));
    assert!(!printed.contains("key"));
    let _: Address = signer.address();
}
