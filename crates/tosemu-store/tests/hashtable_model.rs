#![cfg(not(target_arch = "wasm32"))]

use std::collections::HashMap;

use proptest::prelude::*;
use tosemu_store::{hash, HashTable};

#[derive(Debug, Clone)]
enum Op {
    Put(Vec<u8>, Vec<u8>),
    Get(Vec<u8>),
}

fn small_keys() -> impl Strategy<Value = Vec<u8>> {
    // Short keys over a tiny alphabet so puts collide with earlier keys often.
    proptest::collection::vec(0u8..4, 0..4)
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        (small_keys(), proptest::collection::vec(any::<u8>(), 0..16))
            .prop_map(|(k, v)| Op::Put(k, v)),
        small_keys().prop_map(Op::Get),
    ];
    proptest::collection::vec(op, 0..128)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        rng_algorithm: proptest::test_runner::RngAlgorithm::ChaCha,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0x68_4B),
        .. ProptestConfig::default()
    })]

    #[test]
    fn behaves_like_a_map(buckets in 1usize..24, ops in ops()) {
        let mut table = HashTable::with_buckets(buckets).unwrap();
        let mut model: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();

        for op in ops {
            match op {
                Op::Put(k, v) => {
                    table.put(&k, &v).unwrap();
                    model.insert(k, v);
                }
                Op::Get(k) => {
                    prop_assert_eq!(table.get(&k), model.get(&k).map(Vec::as_slice));
                    prop_assert_eq!(table.contains_key(&k), model.contains_key(&k));
                }
            }
            prop_assert_eq!(table.len(), model.len());
        }

        let mut visited = 0usize;
        table.for_each(|k, v| {
            visited += 1;
            assert_eq!(model.get(k).map(Vec::as_slice), Some(v));
        });
        prop_assert_eq!(visited, table.len());
    }

    #[test]
    fn hash_is_deterministic(key in proptest::collection::vec(any::<u8>(), 0..64)) {
        let copy = key.clone();
        prop_assert_eq!(hash(&key), hash(&copy));
    }
}
