//! The substitutable map/reduce computation.
//!
//! The coordination core only cares that a task produces discoverable
//! output artifacts; the computation behind it is pluggable. The stock
//! workload is word counting: map buckets normalized words by hash into
//! `reduce_count` intermediates, reduce merges the counts for its bucket.

use std::collections::HashMap;
use std::hash::Hasher;

use crate::artifact::{intermediate_name, output_name, Artifact};

/// One map or reduce execution. Implementations must be deterministic per
/// task identity so re-execution after a timeout rewrites identical
/// artifacts.
pub trait Workload {
    /// Run map task `index` over its input, producing exactly
    /// `reduce_count` intermediate artifacts (one per bucket, possibly
    /// empty) named by the `intermediate{bucket}-{index}` convention.
    fn map(&self, index: usize, input: &Artifact, reduce_count: usize) -> Vec<Artifact>;

    /// Run reduce task `index` over the intermediates of its bucket,
    /// producing the single `output{index}` artifact.
    fn reduce(&self, index: usize, inputs: &[Artifact]) -> Artifact;
}

/// Stable bucket hash for partitioning keys across reduce tasks.
pub fn ihash(key: &[u8]) -> u32 {
    let mut hasher = fnv::FnvHasher::with_key(0);
    hasher.write(key);
    (hasher.finish() & 0x7fffffff) as u32
}

/// Word counting over plain text. Intermediate and output lines are
/// `word,count`, sorted by word.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCount;

impl WordCount {
    fn normalize(token: &str) -> String {
        token
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_lowercase()
    }

    fn render(counts: HashMap<String, u64>) -> String {
        let mut entries: Vec<(String, u64)> = counts.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
            .into_iter()
            .map(|(word, count)| format!("{},{}", word, count))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Workload for WordCount {
    fn map(&self, index: usize, input: &Artifact, reduce_count: usize) -> Vec<Artifact> {
        let mut buckets: Vec<HashMap<String, u64>> = vec![HashMap::new(); reduce_count];
        for token in input.data.split_whitespace() {
            let word = Self::normalize(token);
            if word.is_empty() {
                continue;
            }
            let bucket = ihash(word.as_bytes()) as usize % reduce_count;
            *buckets[bucket].entry(word).or_insert(0) += 1;
        }

        buckets
            .into_iter()
            .enumerate()
            .map(|(bucket, counts)| {
                Artifact::new(intermediate_name(bucket, index), Self::render(counts))
            })
            .collect()
    }

    fn reduce(&self, index: usize, inputs: &[Artifact]) -> Artifact {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for input in inputs {
            for line in input.data.lines() {
                let Some((word, count)) = line.rsplit_once(',') else {
                    continue;
                };
                if let Ok(count) = count.parse::<u64>() {
                    *counts.entry(word.to_string()).or_insert(0) += count;
                }
            }
        }
        Artifact::new(output_name(index), Self::render(counts))
    }
}
