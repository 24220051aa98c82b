//! Partitioning of ordered identifier lists into size-bounded shards.
//!
//! Used when a single logical change has to be submitted as several batches.
//! Every strategy here:
//!
//! - produces exactly one shard per entry in its plan, even for empty input;
//! - keeps the input order within each shard;
//! - never duplicates or drops an element (only an over-subscribed size plan
//!   leaves later shards short or empty).
//!
//! Unseeded size, percentage and round-robin sharding also keep the input
//! order across shards. Given a seed, percentage and round-robin sharding
//! first shuffle a sorted copy of the input with an RNG derived from
//! SHA-256 of the seed, so the same seed and the same set of identifiers
//! always give the same assignment whatever order the caller listed them in.
//!
//! [`shard_by_rendezvous`] uses highest-random-weight hashing instead: each
//! identifier goes to the shard whose `sha256("{id}:shard_{i}:{seed}")`
//! prefix is largest. Growing from `n` to `n + 1` shards moves only the
//! identifiers that now land on the new shard, about `1 / (n + 1)` of them.

use std::fmt::Display;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Raw size-plan value meaning "every remaining element".
pub const REMAINDER_SENTINEL: i64 = -1;

/// A size plan or strategy parameter is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShardError {
    #[error("shard size {value} at position {position} is negative (only -1, meaning all remaining, is allowed)")]
    NegativeSize { position: usize, value: i64 },

    #[error("shard percentages must sum to exactly 100, got {0}")]
    PercentageSum(u64),

    #[error("sharding needs at least one shard")]
    ZeroShards,
}

/// Target size of one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardSize {
    /// Take up to this many elements.
    Exact(usize),
    /// Take every element that is left.
    Remainder,
}

impl ShardSize {
    /// Interprets one raw size-plan value.
    pub fn from_raw(position: usize, value: i64) -> Result<Self, ShardError> {
        match value {
            REMAINDER_SENTINEL => Ok(ShardSize::Remainder),
            v if v < 0 => Err(ShardError::NegativeSize { position, value }),
            v => Ok(ShardSize::Exact(usize::try_from(v).unwrap_or(usize::MAX))),
        }
    }
}

/// Parses a raw plan such as `[50, 200, -1]`.
pub fn parse_size_plan(raw: &[i64]) -> Result<Vec<ShardSize>, ShardError> {
    raw.iter()
        .enumerate()
        .map(|(position, &value)| ShardSize::from_raw(position, value))
        .collect()
}

/// One partition of the input. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard<T> {
    target: ShardSize,
    ids: Vec<T>,
}

impl<T> Shard<T> {
    /// The size this shard was asked to hold.
    pub fn target(&self) -> ShardSize {
        self.target
    }

    pub fn ids(&self) -> &[T] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn into_ids(self) -> Vec<T> {
        self.ids
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Splits `ids` by absolute sizes.
///
/// Each `Exact(n)` consumes up to `n` elements from the front of what is left;
/// `Remainder` consumes everything left. Shards after an exhausting entry are
/// returned empty.
pub fn shard_by_size<T>(ids: Vec<T>, plan: &[ShardSize]) -> Vec<Shard<T>> {
    let total = ids.len();
    let mut remaining = ids.into_iter();
    let shards: Vec<Shard<T>> = plan
        .iter()
        .map(|&target| {
            let ids: Vec<T> = match target {
                ShardSize::Exact(n) => remaining.by_ref().take(n).collect(),
                ShardSize::Remainder => remaining.by_ref().collect(),
            };
            Shard { target, ids }
        })
        .collect();

    log_distribution("size", total, &shards);
    shards
}

/// Splits `ids` by percentages, which must sum to exactly 100.
///
/// Shard `i` receives `floor(len * p_i / 100)` elements, except the last
/// shard, which absorbs whatever rounding left over. With a `seed`, elements
/// are assigned in seeded-shuffle order rather than input order.
pub fn shard_by_percentage<T: Ord>(
    ids: Vec<T>,
    percentages: &[u8],
    seed: Option<&str>,
) -> Result<Vec<Shard<T>>, ShardError> {
    let sum: u64 = percentages.iter().map(|&p| u64::from(p)).sum();
    if sum != 100 {
        return Err(ShardError::PercentageSum(sum));
    }

    let total = ids.len();
    let last = percentages.len().saturating_sub(1);
    let plan: Vec<ShardSize> = percentages
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            if i == last {
                ShardSize::Remainder
            } else {
                ShardSize::Exact(total * usize::from(p) / 100)
            }
        })
        .collect();

    match seed {
        None => Ok(shard_by_size(ids, &plan)),
        Some(seed) => Ok(restore_input_order(shard_by_size(
            seeded_order(ids, seed),
            &plan,
        ))),
    }
}

/// Deals `ids` into `count` shards in turn: element `k` goes to shard
/// `k % count`. Shard sizes differ by at most one.
///
/// With a `seed`, `k` is the element's position in the seeded-shuffle order.
pub fn shard_round_robin<T: Ord>(
    ids: Vec<T>,
    count: usize,
    seed: Option<&str>,
) -> Result<Vec<Shard<T>>, ShardError> {
    if count == 0 {
        return Err(ShardError::ZeroShards);
    }

    let total = ids.len();
    let shards = match seed {
        None => deal(ids, count),
        Some(seed) => restore_input_order(deal(seeded_order(ids, seed), count)),
    };

    log_distribution("round_robin", total, &shards);
    Ok(shards)
}

/// Assigns each identifier to one of `count` shards by rendezvous hashing.
///
/// The weight of `id` on shard `i` is the first eight bytes, big-endian, of
/// `sha256("{id}:shard_{i}:{seed}")`. The heaviest shard wins; on a tie the
/// lower index does. The assignment of an identifier depends only on the
/// identifier, `count` and `seed`.
pub fn shard_by_rendezvous<T: Display>(
    ids: Vec<T>,
    count: usize,
    seed: &str,
) -> Result<Vec<Shard<T>>, ShardError> {
    if count == 0 {
        return Err(ShardError::ZeroShards);
    }

    let total = ids.len();
    let mut buckets: Vec<Vec<T>> = (0..count).map(|_| Vec::new()).collect();
    for id in ids {
        let key = id.to_string();
        let mut chosen = 0;
        let mut heaviest = 0u64;
        for shard in 0..count {
            let weight = rendezvous_weight(&key, shard, seed);
            if weight > heaviest {
                heaviest = weight;
                chosen = shard;
            }
        }
        buckets[chosen].push(id);
    }

    let shards = into_exact_shards(buckets);
    log_distribution("rendezvous", total, &shards);
    Ok(shards)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn deal<T>(ids: Vec<T>, count: usize) -> Vec<Shard<T>> {
    let mut buckets: Vec<Vec<T>> = (0..count)
        .map(|_| Vec::with_capacity(ids.len() / count + 1))
        .collect();
    for (k, id) in ids.into_iter().enumerate() {
        buckets[k % count].push(id);
    }
    into_exact_shards(buckets)
}

fn into_exact_shards<T>(buckets: Vec<Vec<T>>) -> Vec<Shard<T>> {
    buckets
        .into_iter()
        .map(|ids| Shard {
            target: ShardSize::Exact(ids.len()),
            ids,
        })
        .collect()
}

fn digest_prefix(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

fn rendezvous_weight(id: &str, shard: usize, seed: &str) -> u64 {
    digest_prefix(&format!("{id}:shard_{shard}:{seed}"))
}

/// Sorts `ids`, then shuffles them with an RNG seeded from `seed`. Each
/// element keeps its original input position alongside it.
fn seeded_order<T: Ord>(ids: Vec<T>, seed: &str) -> Vec<(usize, T)> {
    let mut indexed: Vec<(usize, T)> = ids.into_iter().enumerate().collect();
    indexed.sort_by(|a, b| a.1.cmp(&b.1));
    let mut rng = ChaCha8Rng::seed_from_u64(digest_prefix(seed));
    indexed.shuffle(&mut rng);
    indexed
}

fn restore_input_order<T>(shards: Vec<Shard<(usize, T)>>) -> Vec<Shard<T>> {
    shards
        .into_iter()
        .map(|shard| {
            let Shard { target, mut ids } = shard;
            ids.sort_by_key(|(position, _)| *position);
            Shard {
                target,
                ids: ids.into_iter().map(|(_, id)| id).collect(),
            }
        })
        .collect()
}

fn log_distribution<T>(strategy: &str, total: usize, shards: &[Shard<T>]) {
    let sizes: Vec<usize> = shards.iter().map(Shard::len).collect();
    debug!(strategy, total, ?sizes, "sharded identifiers");
}
