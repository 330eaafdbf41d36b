//! Integration tests for the value and node page encodings

use bytes::{Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cowdb::codec::{InternalNode, LeafNode, Node, Value};
use cowdb::common::{DbError, PageId};

fn sample_document() -> Value {
    Value::document([
        ("_id", Value::from("user:42")),
        ("active", Value::Bool(true)),
        ("age", Value::Int64(-37)),
        ("score", Value::Float64(98.25)),
        ("avatar", Value::Binary(vec![0, 1, 2, 254, 255])),
        ("nickname", Value::Null),
        (
            "tags",
            Value::Array(vec!["admin".into(), "ops".into(), Value::Int64(7)]),
        ),
        (
            "address",
            Value::document([("city", "Lisbon"), ("zip", "1100-148")]),
        ),
    ])
}

fn random_value(rng: &mut StdRng, depth: usize) -> Value {
    let max_tag = if depth >= 4 { 6 } else { 8 };
    match rng.gen_range(0..max_tag) {
        0 => Value::Null,
        1 => Value::Bool(rng.gen()),
        2 => Value::Int64(rng.gen()),
        3 => Value::Float64(f64::from_bits(rng.gen())),
        4 => {
            let len = rng.gen_range(0..16);
            Value::String((0..len).map(|_| rng.gen_range('a'..='z')).collect())
        }
        5 => {
            let len = rng.gen_range(0..16);
            Value::Binary((0..len).map(|_| rng.gen()).collect())
        }
        6 => {
            let len = rng.gen_range(0..5);
            Value::Array((0..len).map(|_| random_value(rng, depth + 1)).collect())
        }
        _ => {
            let len = rng.gen_range(0..5);
            Value::Document(
                (0..len)
                    .map(|i| (format!("f{}", i), random_value(rng, depth + 1)))
                    .collect(),
            )
        }
    }
}

#[test]
fn test_document_round_trip() {
    let doc = sample_document();
    let encoded = doc.encode().unwrap();
    assert_eq!(encoded.len(), doc.encoded_len());
    assert_eq!(Value::decode(&encoded).unwrap(), doc);
}

#[test]
fn test_float_special_values() {
    for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0, f64::MIN_POSITIVE] {
        let value = Value::Float64(f);
        assert_eq!(Value::decode(&value.encode().unwrap()).unwrap(), value);
    }
}

#[test]
fn test_random_values_round_trip() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..500 {
        let value = random_value(&mut rng, 0);
        let encoded = value.encode().unwrap();
        assert_eq!(Value::decode(&encoded).unwrap(), value, "value {}", value);
    }
}

#[test]
fn test_every_truncation_is_rejected() {
    let encoded = sample_document().encode().unwrap();
    for len in 0..encoded.len() {
        let result = Value::decode(&encoded[..len]);
        assert!(
            matches!(result, Err(DbError::CorruptEncoding(_))),
            "prefix of {} bytes decoded",
            len
        );
    }
}

#[test]
fn test_node_round_trip_in_page() {
    let leaf = Node::Leaf(LeafNode::new(vec![
        (Bytes::from_static(b"a"), sample_document().encode().unwrap()),
        (Bytes::from_static(b"b"), Value::Null.encode().unwrap()),
    ]));
    let internal = Node::Internal(InternalNode::new(vec![
        (Bytes::new(), PageId::new(3)),
        (Bytes::from_static(b"m"), PageId::new(17)),
        (Bytes::from_static(b"t"), PageId::new(u64::MAX >> 1)),
    ]));

    for node in [leaf, internal] {
        let encoded = node.encode().unwrap();
        let mut page = BytesMut::zeroed(4096);
        page[..encoded.len()].copy_from_slice(&encoded);
        assert_eq!(Node::decode(&page.freeze()).unwrap(), node);
    }
}

#[test]
fn test_node_corruption_detected() {
    let node = Node::Leaf(LeafNode::new(vec![
        (Bytes::from_static(b"alpha"), Value::Int64(1).encode().unwrap()),
        (Bytes::from_static(b"beta"), Value::Int64(2).encode().unwrap()),
    ]));
    let encoded = node.encode().unwrap();

    for i in 0..encoded.len() {
        let mut page = BytesMut::from(&encoded[..]);
        page[i] ^= 0x01;
        assert!(
            matches!(
                Node::decode(&page.freeze()),
                Err(DbError::CorruptEncoding(_))
            ),
            "flip at byte {} went unnoticed",
            i
        );
    }
}
