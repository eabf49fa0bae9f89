//! Property-based tests for sable-vm.
//!
//! These tests use proptest to verify:
//! - Stack operations (get_top tracks the arithmetic delta of pushes/pops)
//! - Table raw access (set-then-get round trip over mixed key types)
//! - Border length semantics

use proptest::prelude::*;
use sable_vm::{Runtime, Value};

/// A key for table round-trip tests: integers, strings and booleans.
#[derive(Debug, Clone)]
enum Key {
    Int(i64),
    Str(String),
    Bool(bool),
}

fn key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        (-1000i64..1000).prop_map(Key::Int),
        "[a-z]{1,12}".prop_map(Key::Str),
        any::<bool>().prop_map(Key::Bool),
    ]
}

fn make_key(rt: &mut Runtime, key: &Key) -> Value {
    match key {
        Key::Int(i) => Value::Integer(*i),
        Key::Str(s) => {
            let r = rt.heap_mut().new_string(s);
            Value::String(r)
        }
        Key::Bool(b) => Value::Boolean(*b),
    }
}

proptest! {
    /// get_top equals the arithmetic delta of push/pop operations.
    #[test]
    fn stack_top_tracks_operations(ops in prop::collection::vec(0u8..4, 1..60)) {
        let mut rt = Runtime::new();
        let mut expected: i64 = 0;
        for op in ops {
            match op {
                0 => {
                    rt.push_integer(7);
                    expected += 1;
                }
                1 => {
                    if expected > 0 {
                        rt.pop(1);
                        expected -= 1;
                    }
                }
                2 => {
                    if expected > 0 {
                        rt.dup(-1);
                        expected += 1;
                    }
                }
                _ => {
                    if expected > 0 {
                        rt.remove(-1);
                        expected -= 1;
                    }
                }
            }
            prop_assert_eq!(rt.get_top() as i64, expected);
        }
    }

    /// rawset followed by rawget returns the stored value for any key kind.
    #[test]
    fn table_rawset_rawget_round_trips(
        entries in prop::collection::vec((key_strategy(), -10_000i64..10_000), 1..40)
    ) {
        let mut rt = Runtime::new();
        let table = rt.table_new(0, 0);

        // Later writes win for duplicate keys; replay into a reference map.
        let mut reference: Vec<(Key, i64)> = Vec::new();
        for (key, value) in &entries {
            let k = make_key(&mut rt, key);
            rt.heap_mut().table_rawset(table, k, Value::Integer(*value));
            reference.retain(|(existing, _)| {
                !matches!(
                    (existing, key),
                    (Key::Int(a), Key::Int(b)) if a == b
                ) && !matches!(
                    (existing, key),
                    (Key::Str(a), Key::Str(b)) if a == b
                ) && !matches!(
                    (existing, key),
                    (Key::Bool(a), Key::Bool(b)) if a == b
                )
            });
            reference.push((key.clone(), *value));
        }

        for (key, value) in &reference {
            let k = make_key(&mut rt, key);
            let got = rt.heap().table_rawget(table, k);
            prop_assert!(matches!(got, Value::Integer(i) if i == *value),
                "key {:?}: expected {}, got {:?}", key, value, got);
        }
    }

    /// rawlen equals the largest n with t[0..n-1] all non-nil and t[n] nil.
    #[test]
    fn border_matches_reference_definition(
        writes in prop::collection::vec((0usize..48, any::<bool>()), 0..80)
    ) {
        let mut rt = Runtime::new();
        let table = rt.table_new(0, 0);
        let mut reference = vec![false; 256];

        for (index, present) in writes {
            let value = if present { Value::Integer(1) } else { Value::Nil };
            rt.heap_mut().table_rawset(table, Value::Integer(index as i64), value);
            if index < reference.len() {
                reference[index] = present;
            }
        }

        // Indices stay within the array growth limit, so every write landed
        // in the array part and the border is exactly the leading run.
        let expected = reference.iter().take_while(|&&p| p).count();
        prop_assert_eq!(rt.heap().table_length(table), expected);
        let boundary = rt.heap().table_rawget(table, Value::Integer(expected as i64));
        prop_assert!(boundary.is_nil());
    }

    /// Integer values round-trip through the host stack API.
    #[test]
    fn push_integer_round_trips(n in any::<i64>()) {
        let mut rt = Runtime::new();
        rt.push_integer(n);
        prop_assert_eq!(rt.to_integer(-1), Some(n));
    }

    /// String content survives the heap and hashes consistently.
    #[test]
    fn strings_compare_by_content(s in "[ -~]{0,40}") {
        let mut rt = Runtime::new();
        let a = rt.heap_mut().new_string(&s);
        let b = rt.heap_mut().new_string(&s);
        prop_assert!(rt.heap().values_equal(Value::String(a), Value::String(b)));
        prop_assert_eq!(
            rt.heap().value_hash(Value::String(a)),
            rt.heap().value_hash(Value::String(b))
        );
        prop_assert_eq!(rt.heap().string(a).view(), s.as_str());
        prop_assert_eq!(rt.heap().string(a).is_sso(), s.len() <= 31);
    }
}
