use super::types::{Address, Hash, U256};
use super::*;
use serde::Serialize;
use std::collections::BTreeMap;

/*
Python code to split output from remix into chunks of 32 bytes, the annotations
are done manually.
```python
s = "..."
print(*(s[i:i+64] for i in range(0, len(s), 64)), sep="\n")
```
*/
fn expected_bytes(expected: &str) -> Vec<u8> {
    let hex_str: String = expected.split_whitespace().collect();
    hex::decode(hex_str).unwrap()
}

/// Compare slot by slot, so a failing test shows which slot is wrong instead
/// of two walls of hex.
pub(crate) fn serialize_and_compare<T>(value: &T, expected: &str)
where
    T: Serialize,
{
    let actual = to_bytes(value).unwrap();
    let expected = expected_bytes(expected);
    assert_eq!(actual.len() % 32, 0);
    for (i, (a, e)) in actual.chunks(32).zip(expected.chunks(32)).enumerate() {
        assert_eq!(hex::encode(a), hex::encode(e), "slot {} differs", i);
    }
    assert_eq!(actual.len(), expected.len(), "length differs");
}

#[derive(Serialize, Debug)]
struct Asset {
    chain_id: U256,
    holder: Address,
}

#[derive(Serialize, Debug)]
struct Allocation {
    assets: Vec<Asset>,
    balances: Vec<Vec<U256>>,
    locked: Vec<Hash>,
}

#[derive(Serialize, Debug)]
struct ChannelState {
    id: Hash,
    version: u64,
    outcome: Allocation,
    #[serde(with = "as_bytes")]
    app_data: Vec<u8>,
    is_final: bool,
}

const CHANNEL_STATE_SCHEMA: &str = "tuple(bytes32 channelID, uint64 version, \
    tuple(tuple(uint256 chainID, address holder)[] assets, uint256[][] balances, bytes32[] locked) outcome, \
    bytes appData, bool isFinal)";

/* Solidity: get_state_1A2P()
```solidity
function get_state_1A2P() internal pure returns(Channel.State memory) {
    Channel.State memory s;
    s.channelID = "1111";
    s.version = 0x2222;
    s.outcome.assets = new Channel.Asset[](1);
    s.outcome.assets[0].chainID = 0x3333;
    s.outcome.assets[0].holder = 0x5B38Da6a701c568545dCfcB03FcB875f56beddC4;
    s.outcome.balances = new uint256[][](1); // 1 Asset, 2 Participants
    s.outcome.balances[0] = new uint256[](2);
    s.outcome.balances[0][0] = 0x5555;
    s.outcome.balances[0][1] = 0x6666;
    s.appData = "";
    s.isFinal = true;
    return s;
}
```
*/
fn build_channel_state() -> ChannelState {
    // Random address from etherscan, do not use!
    let holder = Address(
        hex::decode("5B38Da6a701c568545dCfcB03FcB875f56beddC4")
            .unwrap()
            .try_into()
            .unwrap(),
    );

    ChannelState {
        id: Hash(*b"1111\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0"),
        version: 0x2222,
        outcome: Allocation {
            assets: vec![Asset {
                chain_id: 0x3333.into(),
                holder,
            }],
            balances: vec![vec![0x5555.into(), 0x6666.into()]],
            locked: vec![],
        },
        app_data: vec![],
        is_final: true,
    }
}

const CHANNEL_STATE_ENCODING: &str = "
    0000000000000000000000000000000000000000000000000000000000000020
    3131313100000000000000000000000000000000000000000000000000000000
    0000000000000000000000000000000000000000000000000000000000002222
    00000000000000000000000000000000000000000000000000000000000000a0
    0000000000000000000000000000000000000000000000000000000000000220
    0000000000000000000000000000000000000000000000000000000000000001
    0000000000000000000000000000000000000000000000000000000000000060
    00000000000000000000000000000000000000000000000000000000000000c0
    0000000000000000000000000000000000000000000000000000000000000160
    0000000000000000000000000000000000000000000000000000000000000001
    0000000000000000000000000000000000000000000000000000000000003333
    0000000000000000000000005b38da6a701c568545dcfcb03fcb875f56beddc4
    0000000000000000000000000000000000000000000000000000000000000001
    0000000000000000000000000000000000000000000000000000000000000020
    0000000000000000000000000000000000000000000000000000000000000002
    0000000000000000000000000000000000000000000000000000000000005555
    0000000000000000000000000000000000000000000000000000000000006666
    0000000000000000000000000000000000000000000000000000000000000000
    0000000000000000000000000000000000000000000000000000000000000000
    ";

#[test]
fn channel_state_encode() {
    serialize_and_compare(&build_channel_state(), CHANNEL_STATE_ENCODING);
}

#[test]
fn channel_state_hash() {
    let hash = to_hash(&build_channel_state()).unwrap();
    assert_eq!(
        hex::encode(hash.0),
        "e7518ad2414d38370ea5f21f1351eabce47480ab191c984ac12a3aedf70eda3d"
    );
}

#[test]
fn channel_state_decodes_to_serialized_token() {
    let ty = parse_schema(CHANNEL_STATE_SCHEMA).unwrap();
    let decoded = decode(&ty, &expected_bytes(CHANNEL_STATE_ENCODING)).unwrap();
    assert_eq!(decoded, to_token(&build_channel_state()).unwrap());
}

#[test]
fn u64() {
    /*
    ```solidity
        uint64 d = 0x1337000012341111;
        return abi.encode(d);
    ```
    */
    let d: u64 = 0x1337000012341111;
    serialize_and_compare(
        &d,
        "0000000000000000000000000000000000000000000000001337000012341111",
    );
}

#[test]
fn negative_int() {
    let d: i16 = -2;
    serialize_and_compare(
        &d,
        "fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffe",
    );
}

#[test]
fn dynamic_bytes() {
    /*
    ```solidity
        bytes memory d = "\xa1\xa2\xa3\xa4";
        return abi.encode(d);
    ```
    */
    #[derive(Serialize)]
    #[serde(transparent)]
    struct Bytes {
        #[serde(with = "as_bytes")]
        value: Vec<u8>,
    }

    serialize_and_compare(
        &Bytes {
            value: vec![0xa1, 0xa2, 0xa3, 0xa4],
        },
        "
        0000000000000000000000000000000000000000000000000000000000000020
        0000000000000000000000000000000000000000000000000000000000000004
        a1a2a3a400000000000000000000000000000000000000000000000000000000
        ",
    );
}

#[test]
fn string_and_static_tuple() {
    #[derive(Serialize)]
    struct Named<'a> {
        name: &'a str,
        pair: (u8, bool),
    }

    serialize_and_compare(
        &Named {
            name: "abc",
            pair: (7, true),
        },
        "
        0000000000000000000000000000000000000000000000000000000000000020
        0000000000000000000000000000000000000000000000000000000000000060
        0000000000000000000000000000000000000000000000000000000000000007
        0000000000000000000000000000000000000000000000000000000000000001
        0000000000000000000000000000000000000000000000000000000000000003
        6162630000000000000000000000000000000000000000000000000000000000
        ",
    );
}

#[test]
fn unit_variants_are_indices() {
    #[derive(Serialize)]
    enum Kind {
        _First,
        Second,
    }
    assert_eq!(to_token(&Kind::Second).unwrap(), Token::Uint(1.into()));
}

#[test]
fn unrepresentable_types() {
    assert_eq!(to_token(&1.5f32), Err(Error::TypeNotRepresentable("f32")));
    assert_eq!(to_token(&'x'), Err(Error::TypeNotYetSupported("char")));
    assert_eq!(
        to_token(&Option::<u8>::None),
        Err(Error::TypeNotRepresentable("Option::None"))
    );
    let map: BTreeMap<u8, u8> = BTreeMap::new();
    assert_eq!(to_token(&map), Err(Error::TypeNotRepresentable("map")));
}

#[test]
fn schema_parsing() {
    assert_eq!(
        parse_schema("tuple(tuple(address to, uint256 amount)[2] coinTransfers, bytes32 linkedHash)")
            .unwrap(),
        ParamType::Tuple(vec![
            ParamType::FixedArray(
                Box::new(ParamType::Tuple(vec![ParamType::Address, ParamType::Uint(256)])),
                2
            ),
            ParamType::FixedBytes(32),
        ])
    );
    assert_eq!(
        parse_schema("(uint, int8[][3], string)").unwrap(),
        ParamType::Tuple(vec![
            ParamType::Uint(256),
            ParamType::FixedArray(Box::new(ParamType::Array(Box::new(ParamType::Int(8)))), 3),
            ParamType::String,
        ])
    );
    assert_eq!(parse_schema("tuple()").unwrap(), ParamType::Tuple(vec![]));
}

#[test]
fn schema_errors() {
    for schema in [
        "uint7",
        "uint512",
        "bytes33",
        "bytes0",
        "tuple(uint256",
        "tuple(uint256,)",
        "uint256[2",
        "float",
        "uint256 a b",
        "",
    ] {
        assert!(
            matches!(parse_schema(schema), Err(Error::InvalidSchema { .. })),
            "schema {:?} should be rejected",
            schema
        );
    }
}

#[test]
fn decode_rejects_non_canonical_input() {
    let ty = parse_schema("tuple(address a, bool b, uint8 c)").unwrap();
    let good = expected_bytes(
        "
        0000000000000000000000005b38da6a701c568545dcfcb03fcb875f56beddc4
        0000000000000000000000000000000000000000000000000000000000000001
        00000000000000000000000000000000000000000000000000000000000000ff
        ",
    );
    assert!(decode(&ty, &good).is_ok());

    let mut dirty_address = good.clone();
    dirty_address[0] = 1;
    assert!(matches!(
        decode(&ty, &dirty_address),
        Err(Error::InvalidValue { kind: "address", .. })
    ));

    let mut bad_bool = good.clone();
    bad_bool[63] = 2;
    assert!(matches!(
        decode(&ty, &bad_bool),
        Err(Error::InvalidValue { kind: "bool", .. })
    ));

    let mut uint_overflow = good.clone();
    uint_overflow[94] = 1;
    assert!(matches!(
        decode(&ty, &uint_overflow),
        Err(Error::InvalidValue { kind: "uint", .. })
    ));

    let mut trailing = good.clone();
    trailing.extend_from_slice(&[0u8; 32]);
    assert_eq!(decode(&ty, &trailing), Err(Error::NonCanonical));

    assert!(matches!(
        decode(&ty, &good[..64]),
        Err(Error::UnexpectedEnd { .. })
    ));
}

#[test]
fn decode_rejects_out_of_bounds_lengths() {
    let ty = parse_schema("bytes").unwrap();
    let huge_length = expected_bytes(
        "
        0000000000000000000000000000000000000000000000000000000000000020
        00000000000000000000000000000000000000000000000000000000ffffffff
        ",
    );
    assert!(decode(&ty, &huge_length).is_err());
}

#[test]
fn decode_int_sign_extension() {
    let ty = ParamType::Int(8);
    let minus_one = expected_bytes("ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff");
    assert!(decode(&ty, &minus_one).is_ok());
    let not_sign_extended =
        expected_bytes("00000000000000000000000000000000000000000000000000000000000000ff");
    assert!(matches!(
        decode(&ty, &not_sign_extended),
        Err(Error::InvalidValue { kind: "int", .. })
    ));
}
