use super::{
    to_bytes, to_hash,
    types::{Address, Hash, U256},
    Error,
};
use serde::Serialize;

/*
The expected values are written one field per line: the hex bytes of the field
first, followed by an optional description. Lines are concatenated before
comparing, so the grouping only exists to make failures easier to read.
*/
pub fn serialize_and_compare<T>(value: &T, expected: &str)
where
    T: Serialize,
{
    let expected: String = expected
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    let expected = hex::decode(expected).expect("expected value must be valid hex");

    let encoded = to_bytes(value).unwrap();
    assert_eq!(
        hex::encode(&encoded),
        hex::encode(&expected),
        "packed encoding did not match"
    );
}

#[test]
fn u64_is_eight_bytes() {
    serialize_and_compare(
        &0x1337000012341111u64,
        "
        1337000012341111
        ",
    );
}

#[test]
fn u256_is_thirty_two_bytes() {
    serialize_and_compare(
        &U256::from(0x1234u64),
        "
        0000000000000000000000000000000000000000000000000000000000001234
        ",
    );
}

#[test]
fn address_is_not_padded() {
    let addr = Address(<[u8; 20]>::try_from(hex::decode("5b38da6a701c568545dcfcb03fcb875f56beddc4").unwrap()).unwrap());
    serialize_and_compare(
        &addr,
        "
        5b38da6a701c568545dcfcb03fcb875f56beddc4
        ",
    );
}

#[derive(Serialize)]
struct Inner {
    flag: bool,
    small: u8,
}

#[derive(Serialize)]
struct Outer {
    id: Hash,
    inner: Inner,
    count: u32,
    tail: (u16, [Hash; 1]),
}

#[test]
fn nested_struct_is_flattened() {
    let value = Outer {
        id: Hash([0x11; 32]),
        inner: Inner {
            flag: true,
            small: 0x7f,
        },
        count: 0xdeadbeef,
        tail: (0x0102, [Hash([0x22; 32])]),
    };

    serialize_and_compare(
        &value,
        "
        1111111111111111111111111111111111111111111111111111111111111111 id
        01                                                               inner.flag
        7f                                                               inner.small
        deadbeef                                                         count
        0102                                                             tail.0
        2222222222222222222222222222222222222222222222222222222222222222 tail.1[0]
        ",
    );
}

#[test]
fn vec_has_no_length_prefix() {
    let value = vec![Hash([0xaa; 32]), Hash([0xbb; 32])];
    serialize_and_compare(
        &value,
        "
        aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa
        bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb
        ",
    );
}

#[test]
fn unsupported_types_are_rejected() {
    assert!(matches!(to_bytes(&1.5f64), Err(Error::TypeNotRepresentable("f64"))));
    assert!(matches!(to_bytes("abc"), Err(Error::TypeNotRepresentable("str"))));
    assert!(matches!(to_bytes(&-1i64), Err(Error::TypeNotRepresentable("i64"))));
    assert!(matches!(
        to_bytes(&Some(1u64)),
        Err(Error::TypeNotRepresentable("Option"))
    ));
}

#[test]
fn hash_matches_keccak_of_bytes() {
    // keccak256("") is a well known constant.
    let empty: [u8; 0] = [];
    assert_eq!(
        to_hash(&empty).unwrap(),
        Hash(
            <[u8; 32]>::try_from(
                hex::decode("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
                    .unwrap()
            )
            .unwrap()
        )
    );

    let value = (U256::from(7u64), 9u64);
    assert_eq!(
        to_hash(&value).unwrap(),
        super::keccak256(&[&to_bytes(&value).unwrap()])
    );
}
