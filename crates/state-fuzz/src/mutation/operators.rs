use std::num::NonZero;

use indexmap::IndexMap;
use libafl_bolts::rands::{Rand, StdRand};
use thiserror::Error;

use crate::state::StateDict;

/// A mutation operator: a pure transformation of the input bytes, free to
/// consult the mutation context and the engine RNG.
pub type OperatorFn = fn(&mut StdRand, &[u8], &StateDict) -> Result<Vec<u8>, OperatorError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct OperatorError(pub String);

/// Named operators, statically linked and bound by name from the strategy.
#[derive(Debug, Clone)]
pub struct OperatorRegistry {
    operators: IndexMap<String, OperatorFn>,
}

impl OperatorRegistry {
    pub fn empty() -> Self {
        Self {
            operators: IndexMap::new(),
        }
    }

    /// The full builtin repertoire.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("bit_flip", bit_flip);
        registry.register("set_random_byte", set_random_byte);
        registry.register("insert_random_bytes", insert_random_bytes);
        registry.register("delete_bytes", delete_bytes);
        registry.register("duplicate_bytes", duplicate_bytes);
        registry.register("swap_bytes", swap_bytes);
        registry.register("arith_byte", arith_byte);
        registry.register("interesting_byte", interesting_byte);
        registry.register("interesting_word", interesting_word);
        registry.register("truncate_tail", truncate_tail);
        registry
    }

    /// Register an operator, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, operator: OperatorFn) {
        self.operators.insert(name.into(), operator);
    }

    pub fn get(&self, name: &str) -> Option<OperatorFn> {
        self.operators.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operators.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

const INTERESTING_8: [i8; 9] = [-128, -1, 0, 1, 16, 32, 64, 100, 127];
const INTERESTING_16: [i16; 10] = [
    i16::MIN,
    -129,
    128,
    255,
    256,
    512,
    1000,
    1024,
    4096,
    i16::MAX,
];

fn random_byte(rand: &mut StdRand) -> u8 {
    rand.next() as u8
}

fn nz(value: usize) -> NonZero<usize> {
    NonZero::new(value).expect("nonzero constant")
}

/// Flip one random bit.
pub fn bit_flip(rand: &mut StdRand, data: &[u8], ctx: &StateDict) -> Result<Vec<u8>, OperatorError> {
    let Some(len) = NonZero::new(data.len()) else {
        return insert_random_bytes(rand, data, ctx);
    };
    let mut out = data.to_vec();
    let pos = rand.below(len);
    out[pos] ^= 1 << rand.below(nz(8));
    Ok(out)
}

/// Overwrite one random position with a random byte.
pub fn set_random_byte(
    rand: &mut StdRand,
    data: &[u8],
    ctx: &StateDict,
) -> Result<Vec<u8>, OperatorError> {
    let Some(len) = NonZero::new(data.len()) else {
        return insert_random_bytes(rand, data, ctx);
    };
    let mut out = data.to_vec();
    let pos = rand.below(len);
    out[pos] = random_byte(rand);
    Ok(out)
}

/// Insert a short random run at a random position. Total on empty input,
/// which makes it the fallback the other operators grow from.
pub fn insert_random_bytes(
    rand: &mut StdRand,
    data: &[u8],
    _ctx: &StateDict,
) -> Result<Vec<u8>, OperatorError> {
    let count = 1 + rand.below(nz(4));
    let pos = rand.below(nz(data.len() + 1));
    let mut out = Vec::with_capacity(data.len() + count);
    out.extend_from_slice(&data[..pos]);
    out.extend((0..count).map(|_| random_byte(rand)));
    out.extend_from_slice(&data[pos..]);
    Ok(out)
}

/// Remove a short random range.
pub fn delete_bytes(
    rand: &mut StdRand,
    data: &[u8],
    ctx: &StateDict,
) -> Result<Vec<u8>, OperatorError> {
    let Some(len) = NonZero::new(data.len()) else {
        return insert_random_bytes(rand, data, ctx);
    };
    let start = rand.below(len);
    let count = 1 + rand.below(nz((data.len() - start).min(4)));
    let mut out = data[..start].to_vec();
    out.extend_from_slice(&data[start + count..]);
    Ok(out)
}

/// Re-insert a random range at a random position.
pub fn duplicate_bytes(
    rand: &mut StdRand,
    data: &[u8],
    ctx: &StateDict,
) -> Result<Vec<u8>, OperatorError> {
    let Some(len) = NonZero::new(data.len()) else {
        return insert_random_bytes(rand, data, ctx);
    };
    let start = rand.below(len);
    let count = 1 + rand.below(nz((data.len() - start).min(8)));
    let block = data[start..start + count].to_vec();
    let pos = rand.below(nz(data.len() + 1));
    let mut out = Vec::with_capacity(data.len() + block.len());
    out.extend_from_slice(&data[..pos]);
    out.extend_from_slice(&block);
    out.extend_from_slice(&data[pos..]);
    Ok(out)
}

/// Swap two random positions.
pub fn swap_bytes(
    rand: &mut StdRand,
    data: &[u8],
    ctx: &StateDict,
) -> Result<Vec<u8>, OperatorError> {
    let Some(len) = NonZero::new(data.len()) else {
        return insert_random_bytes(rand, data, ctx);
    };
    let mut out = data.to_vec();
    let first = rand.below(len);
    let second = rand.below(len);
    out.swap(first, second);
    Ok(out)
}

/// Add a small signed delta to one random byte, wrapping.
pub fn arith_byte(
    rand: &mut StdRand,
    data: &[u8],
    ctx: &StateDict,
) -> Result<Vec<u8>, OperatorError> {
    let Some(len) = NonZero::new(data.len()) else {
        return insert_random_bytes(rand, data, ctx);
    };
    let mut out = data.to_vec();
    let pos = rand.below(len);
    let delta = (1 + rand.below(nz(16))) as u8;
    if rand.coinflip(0.5) {
        out[pos] = out[pos].wrapping_add(delta);
    } else {
        out[pos] = out[pos].wrapping_sub(delta);
    }
    Ok(out)
}

/// Overwrite one random byte with an interesting constant.
pub fn interesting_byte(
    rand: &mut StdRand,
    data: &[u8],
    ctx: &StateDict,
) -> Result<Vec<u8>, OperatorError> {
    let Some(len) = NonZero::new(data.len()) else {
        return insert_random_bytes(rand, data, ctx);
    };
    let mut out = data.to_vec();
    let pos = rand.below(len);
    let value = rand
        .choose(INTERESTING_8.iter())
        .copied()
        .expect("constant table is non-empty");
    out[pos] = value as u8;
    Ok(out)
}

/// Overwrite two adjacent bytes with an interesting 16-bit constant,
/// little-endian.
pub fn interesting_word(
    rand: &mut StdRand,
    data: &[u8],
    ctx: &StateDict,
) -> Result<Vec<u8>, OperatorError> {
    let Some(span) = data.len().checked_sub(1).and_then(NonZero::new) else {
        return insert_random_bytes(rand, data, ctx);
    };
    let mut out = data.to_vec();
    let pos = rand.below(span);
    let value = rand
        .choose(INTERESTING_16.iter())
        .copied()
        .expect("constant table is non-empty");
    out[pos..pos + 2].copy_from_slice(&value.to_le_bytes());
    Ok(out)
}

/// Drop a random-length tail.
pub fn truncate_tail(
    rand: &mut StdRand,
    data: &[u8],
    ctx: &StateDict,
) -> Result<Vec<u8>, OperatorError> {
    let Some(span) = data.len().checked_sub(1).and_then(NonZero::new) else {
        return insert_random_bytes(rand, data, ctx);
    };
    let keep = 1 + rand.below(span);
    Ok(data[..keep].to_vec())
}
