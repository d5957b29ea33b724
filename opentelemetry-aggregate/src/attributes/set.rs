use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::Lazy;
use opentelemetry::{Array, Key, KeyValue, Value};
use ordered_float::OrderedFloat;

/// The attribute set all measurements are folded into once an aggregator
/// reaches its cardinality limit.
pub(crate) static STREAM_OVERFLOW_ATTRIBUTES: Lazy<AttributeSet> =
    Lazy::new(|| AttributeSet::from(&[KeyValue::new("otel.metric.overflow", true)][..]));

static EMPTY_SET: Lazy<Arc<InternalAttributeSet>> =
    Lazy::new(|| Arc::new(InternalAttributeSet::from_sorted(Vec::with_capacity(0))));

#[derive(Clone, Debug)]
struct HashKeyValue(KeyValue);

impl Hash for HashKeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.key.hash(state);
        type_order(&self.0.value).hash(state);
        match &self.0.value {
            Value::Bool(b) => b.hash(state),
            Value::I64(i) => i.hash(state),
            Value::F64(f) => OrderedFloat(*f).hash(state),
            Value::String(s) => s.as_str().hash(state),
            Value::Array(Array::Bool(b)) => b.hash(state),
            Value::Array(Array::I64(i)) => i.hash(state),
            Value::Array(Array::F64(f)) => f.iter().for_each(|f| OrderedFloat(*f).hash(state)),
            Value::Array(Array::String(s)) => s.iter().for_each(|s| s.as_str().hash(state)),
            other => other.to_string().hash(state),
        }
    }
}

impl PartialOrd for HashKeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HashKeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .key
            .cmp(&other.0.key)
            .then_with(|| type_order(&self.0.value).cmp(&type_order(&other.0.value)))
            .then_with(|| cmp_same_type(&self.0.value, &other.0.value))
    }
}

impl PartialEq for HashKeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HashKeyValue {}

fn cmp_same_type(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(b), Value::Bool(ob)) => b.cmp(ob),
        (Value::I64(i), Value::I64(oi)) => i.cmp(oi),
        (Value::F64(f), Value::F64(of)) => OrderedFloat(*f).cmp(&OrderedFloat(*of)),
        (Value::String(s), Value::String(os)) => s.as_str().cmp(os.as_str()),
        (Value::Array(Array::Bool(b)), Value::Array(Array::Bool(ob))) => b.cmp(ob),
        (Value::Array(Array::I64(i)), Value::Array(Array::I64(oi))) => i.cmp(oi),
        (Value::Array(Array::F64(f)), Value::Array(Array::F64(of))) => f
            .iter()
            .map(|x| OrderedFloat(*x))
            .cmp(of.iter().map(|x| OrderedFloat(*x))),
        (Value::Array(Array::String(s)), Value::Array(Array::String(os))) => s
            .iter()
            .map(|s| s.as_str())
            .cmp(os.iter().map(|s| s.as_str())),
        (a, b) => a.to_string().cmp(&b.to_string()),
    }
}

fn type_order(v: &Value) -> u8 {
    match v {
        Value::Bool(_) => 1,
        Value::I64(_) => 2,
        Value::F64(_) => 3,
        Value::String(_) => 4,
        Value::Array(Array::Bool(_)) => 5,
        Value::Array(Array::I64(_)) => 6,
        Value::Array(Array::F64(_)) => 7,
        Value::Array(Array::String(_)) => 8,
        _ => 9,
    }
}

#[derive(Eq, PartialEq, Debug)]
struct InternalAttributeSet {
    key_values: Vec<HashKeyValue>,
    hash: u64,
}

impl InternalAttributeSet {
    /// `values` must already be sorted by key with no duplicate keys.
    fn from_sorted(values: Vec<HashKeyValue>) -> Self {
        let mut hasher = DefaultHasher::new();
        values.iter().for_each(|kv| kv.hash(&mut hasher));

        InternalAttributeSet {
            key_values: values,
            hash: hasher.finish(),
        }
    }
}

impl From<&[KeyValue]> for InternalAttributeSet {
    fn from(values: &[KeyValue]) -> Self {
        // Reversed so that a stable sort followed by `dedup_by` keeps the last
        // value given for a repeated key.
        let mut key_values = values
            .iter()
            .rev()
            .cloned()
            .map(HashKeyValue)
            .collect::<Vec<_>>();
        key_values.sort_by(|a, b| a.0.key.cmp(&b.0.key));
        key_values.dedup_by(|a, b| a.0.key == b.0.key);

        InternalAttributeSet::from_sorted(key_values)
    }
}

impl Hash for InternalAttributeSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash)
    }
}

/// A unique set of attributes that can be used as an aggregation cell key.
///
/// Pairs are sorted by key and deduplicated at construction, so two sets
/// built from the same pairs in any order are equal and hash identically.
/// When a key repeats, the last value given wins.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AttributeSet(Arc<InternalAttributeSet>);

impl From<&[KeyValue]> for AttributeSet {
    fn from(values: &[KeyValue]) -> Self {
        if values.is_empty() {
            return AttributeSet::default();
        }
        AttributeSet(Arc::new(InternalAttributeSet::from(values)))
    }
}

impl AttributeSet {
    /// Returns the number of elements in the set.
    pub fn len(&self) -> usize {
        self.0.key_values.len()
    }

    /// Returns `true` if the set contains no elements.
    pub fn is_empty(&self) -> bool {
        self.0.key_values.is_empty()
    }

    /// Iterate over key value pairs in the set
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.0.key_values.iter().map(|kv| (&kv.0.key, &kv.0.value))
    }

    /// Projects the set with `keep`, returning the retained set together with
    /// the attributes that were dropped.
    pub fn split<F>(&self, keep: F) -> (AttributeSet, Vec<KeyValue>)
    where
        F: Fn(&KeyValue) -> bool,
    {
        let mut kept = Vec::with_capacity(self.len());
        let mut dropped = Vec::new();
        for kv in self.0.key_values.iter() {
            if keep(&kv.0) {
                kept.push(kv.clone());
            } else {
                dropped.push(kv.0.clone());
            }
        }
        if dropped.is_empty() {
            return (self.clone(), dropped);
        }

        (
            AttributeSet(Arc::new(InternalAttributeSet::from_sorted(kept))),
            dropped,
        )
    }

    /// Copies the pairs out in key order.
    pub fn to_vec(&self) -> Vec<KeyValue> {
        self.0.key_values.iter().map(|kv| kv.0.clone()).collect()
    }
}

impl Default for AttributeSet {
    fn default() -> Self {
        AttributeSet(EMPTY_SET.clone())
    }
}

/// Hashing for maps keyed by [`AttributeSet`].
///
/// The set already carries a precomputed hash, so the hasher only forwards
/// that single `u64`. Any other key type will panic.
#[derive(Default, Clone, Copy, Debug)]
pub(crate) struct AttributeSetHasherBuilder;

#[derive(Default)]
pub(crate) struct AttributeSetHasher {
    hashed: u64,
}

impl Hasher for AttributeSetHasher {
    fn finish(&self) -> u64 {
        self.hashed
    }

    fn write(&mut self, _bytes: &[u8]) {
        panic!("Only works with `AttributeSet` keys")
    }

    fn write_u64(&mut self, i: u64) {
        self.hashed = i;
    }
}

impl BuildHasher for AttributeSetHasherBuilder {
    type Hasher = AttributeSetHasher;

    fn build_hasher(&self) -> Self::Hasher {
        AttributeSetHasher::default()
    }
}
