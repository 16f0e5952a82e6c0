//! Layout of variable-length collections
//!
//! A `Partition` describes how a flat buffer is divided among the ranks of a communicator: rank
//! `i` owns `counts[i]` elements starting at `displs[i]`, where the displacements are the prefix
//! sums of the counts.

use std::ops::Range;

use conv::ConvUtil;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::Count;

/// Per-rank counts and displacements into a flat buffer.
///
/// Invariants: `displs[0] == 0`, `displs[i] == counts[0] + ... + counts[i - 1]` and `total()`
/// is the sum of all counts, which fits in a `Count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    counts: SmallVec<[Count; 8]>,
    displs: SmallVec<[Count; 8]>,
    total: Count,
}

impl Partition {
    /// Builds the layout for the given per-rank counts.
    ///
    /// Fails with `Error::Count` if a count is negative or the total overflows `Count`.
    pub fn from_counts<I>(counts: I) -> Result<Partition>
    where
        I: IntoIterator<Item = Count>,
    {
        let counts: SmallVec<[Count; 8]> = counts.into_iter().collect();
        let mut displs = SmallVec::with_capacity(counts.len());
        let mut total: Count = 0;
        for (rank, &count) in counts.iter().enumerate() {
            if count < 0 {
                return Err(Error::count(format!("negative count {} for rank {}", count, rank)));
            }
            displs.push(total);
            total = total
                .checked_add(count)
                .ok_or_else(|| Error::count("sum of counts exceeds the native count range"))?;
        }
        Ok(Partition {
            counts,
            displs,
            total,
        })
    }

    /// Builds the layout from Rust lengths, converting each to a `Count`.
    pub fn from_lengths<I>(lengths: I) -> Result<Partition>
    where
        I: IntoIterator<Item = usize>,
    {
        let counts = lengths
            .into_iter()
            .map(|len| {
                len.value_as::<Count>().map_err(|_| {
                    Error::count(format!("length {} exceeds the native count range", len))
                })
            })
            .collect::<Result<SmallVec<[Count; 8]>>>()?;
        Partition::from_counts(counts)
    }

    /// Number of elements owned by each rank
    pub fn counts(&self) -> &[Count] {
        &self.counts
    }

    /// Offset of each rank's first element
    pub fn displs(&self) -> &[Count] {
        &self.displs
    }

    /// Number of ranks described
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether no ranks are described
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Total number of elements
    pub fn total(&self) -> usize {
        self.total as usize
    }

    /// The element range owned by `rank`.
    pub fn range(&self, rank: usize) -> Range<usize> {
        let start = self.displs[rank] as usize;
        start..start + self.counts[rank] as usize
    }

    /// The same layout measured in units `factor` times smaller, e.g. primitive elements instead
    /// of items.
    pub fn scaled(&self, factor: usize) -> Result<Partition> {
        let factor = factor.value_as::<Count>().map_err(|_| {
            Error::count(format!("scale factor {} exceeds the native count range", factor))
        })?;
        let counts = self
            .counts
            .iter()
            .map(|&count| {
                count
                    .checked_mul(factor)
                    .ok_or_else(|| Error::count("scaled count exceeds the native count range"))
            })
            .collect::<Result<SmallVec<[Count; 8]>>>()?;
        Partition::from_counts(counts)
    }

    /// Splits a flat vector laid out according to this partition into one vector per rank.
    pub fn split<T>(&self, flat: Vec<T>) -> Vec<Vec<T>> {
        debug_assert_eq!(flat.len(), self.total());
        let mut items = flat.into_iter();
        self.counts
            .iter()
            .map(|&count| items.by_ref().take(count as usize).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displacements_are_prefix_sums() {
        let partition = Partition::from_counts(vec![3, 0, 2, 5]).unwrap();
        assert_eq!(partition.counts(), &[3, 0, 2, 5]);
        assert_eq!(partition.displs(), &[0, 3, 3, 5]);
        assert_eq!(partition.total(), 10);
        assert_eq!(partition.range(2), 3..5);
        assert_eq!(partition.range(1), 3..3);
    }

    #[test]
    fn empty_partition() {
        let partition = Partition::from_counts(None).unwrap();
        assert!(partition.is_empty());
        assert_eq!(partition.total(), 0);
    }

    #[test]
    fn invalid_counts_are_rejected() {
        assert_eq!(
            Partition::from_counts(vec![1, -1]).unwrap_err().kind(),
            crate::ErrorKind::Count
        );
        assert!(Partition::from_counts(vec![Count::MAX, 1]).is_err());
        assert!(Partition::from_lengths(vec![usize::MAX]).is_err());
    }

    #[test]
    fn scaling_multiplies_counts_and_offsets() {
        let partition = Partition::from_lengths(vec![1, 2, 3]).unwrap().scaled(4).unwrap();
        assert_eq!(partition.counts(), &[4, 8, 12]);
        assert_eq!(partition.displs(), &[0, 4, 12]);
        assert!(Partition::from_counts(vec![Count::MAX]).unwrap().scaled(2).is_err());
    }

    #[test]
    fn split_follows_the_counts() {
        let partition = Partition::from_counts(vec![2, 0, 1]).unwrap();
        assert_eq!(
            partition.split(vec!['a', 'b', 'c']),
            vec![vec!['a', 'b'], vec![], vec!['c']]
        );
    }
}
