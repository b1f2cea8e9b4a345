//! Per-phase task completion bitmap, gossiped inside heartbeats.
//!
//! Merging is a logical OR: a bit that is set locally can never be cleared
//! by a remote view, which is what makes completion monotone across the
//! cluster.

use crate::error::{MapredError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBitmap {
    bits: Vec<bool>,
}

impl TaskBitmap {
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }

    pub fn set(&mut self, index: usize) {
        if let Some(bit) = self.bits.get_mut(index) {
            *bit = true;
        }
    }

    pub fn all_set(&self) -> bool {
        self.bits.iter().all(|&b| b)
    }

    pub fn count_set(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// OR-merge a remote view into this one. Never clears a local bit.
    /// Length mismatches merge the common prefix only.
    pub fn merge(&mut self, other: &TaskBitmap) {
        for (bit, &remote) in self.bits.iter_mut().zip(other.bits.iter()) {
            *bit |= remote;
        }
    }

    /// Wire form: one `0`/`1` character per task, in index order.
    pub fn encode(&self) -> String {
        self.bits.iter().map(|&b| if b { '1' } else { '0' }).collect()
    }

    pub fn decode(s: &str) -> Result<Self> {
        let bits = s
            .chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                other => Err(MapredError::malformed(
                    "bitmap",
                    format!("unexpected character '{}'", other),
                )),
            })
            .collect::<Result<Vec<bool>>>()?;
        Ok(Self { bits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bitmap_is_clear() {
        let bm = TaskBitmap::new(5);
        assert_eq!(bm.len(), 5);
        assert_eq!(bm.count_set(), 0);
        assert!(!bm.all_set());
        assert!(!bm.get(0));
    }

    #[test]
    fn set_and_count() {
        let mut bm = TaskBitmap::new(3);
        bm.set(0);
        bm.set(2);
        assert!(bm.get(0));
        assert!(!bm.get(1));
        assert!(bm.get(2));
        assert_eq!(bm.count_set(), 2);

        bm.set(1);
        assert!(bm.all_set());
    }

    #[test]
    fn set_out_of_range_is_ignored() {
        let mut bm = TaskBitmap::new(2);
        bm.set(10);
        assert_eq!(bm.count_set(), 0);
        assert!(!bm.get(10));
    }

    #[test]
    fn merge_is_monotone_or() {
        let mut local = TaskBitmap::new(4);
        local.set(0);

        let mut remote = TaskBitmap::new(4);
        remote.set(2);

        local.merge(&remote);
        assert!(local.get(0), "local bit survives a merge");
        assert!(local.get(2), "remote bit is adopted");
        assert!(!local.get(1));

        // A fully clear remote view never clears anything.
        local.merge(&TaskBitmap::new(4));
        assert_eq!(local.count_set(), 2);
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut bm = TaskBitmap::new(5);
        bm.set(1);
        bm.set(4);
        assert_eq!(bm.encode(), "01001");

        let decoded = TaskBitmap::decode("01001").unwrap();
        assert_eq!(decoded, bm);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(TaskBitmap::decode("01x01").is_err());
    }
}
