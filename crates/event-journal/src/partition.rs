// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexSpaces.
//
// PlexSpaces is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexSpaces is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexSpaces. If not, see <https://www.gnu.org/licenses/>.

//! Mapping of sequence numbers to partitions.
//!
//! A stream's events are spread over partitions of `partition_size`
//! consecutive sequence numbers: sequence numbers `1..=size` land in
//! partition 0, `size+1..=2*size` in partition 1 and so on. The mapping only
//! depends on the sequence number and the configured size, so every writer
//! and reader computes the same partition for the same event.

/// Maps sequence numbers to partition numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionMapper {
    partition_size: u64,
}

impl PartitionMapper {
    /// Create a mapper.
    ///
    /// `partition_size` must be positive; [`crate::JournalConfig::validate`]
    /// rejects zero before a mapper is ever built. A zero is treated as 1.
    pub fn new(partition_size: u64) -> Self {
        Self {
            partition_size: partition_size.max(1),
        }
    }

    /// Configured partition size.
    pub fn partition_size(&self) -> u64 {
        self.partition_size
    }

    /// Partition holding a (1-based) sequence number.
    pub fn partition_nr(&self, sequence_nr: u64) -> u64 {
        sequence_nr.saturating_sub(1) / self.partition_size
    }

    /// First sequence number stored in a partition.
    pub fn first_sequence_nr(&self, partition_nr: u64) -> u64 {
        partition_nr
            .saturating_mul(self.partition_size)
            .saturating_add(1)
    }

    /// Last sequence number stored in a partition.
    pub fn last_sequence_nr(&self, partition_nr: u64) -> u64 {
        partition_nr
            .saturating_add(1)
            .saturating_mul(self.partition_size)
    }

    /// Split items into runs that share a partition, preserving order.
    ///
    /// Consecutive items with the same partition form one group.
    pub fn group_by_partition<T, F>(&self, items: Vec<T>, sequence_nr: F) -> Vec<(u64, Vec<T>)>
    where
        F: Fn(&T) -> u64,
    {
        let mut groups: Vec<(u64, Vec<T>)> = Vec::new();
        for item in items {
            let partition_nr = self.partition_nr(sequence_nr(&item));
            match groups.last_mut() {
                Some((last, group)) if *last == partition_nr => group.push(item),
                _ => groups.push((partition_nr, vec![item])),
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_boundaries() {
        let mapper = PartitionMapper::new(5);
        assert_eq!(mapper.partition_nr(1), 0);
        assert_eq!(mapper.partition_nr(5), 0);
        assert_eq!(mapper.partition_nr(6), 1);
        assert_eq!(mapper.partition_nr(10), 1);
        assert_eq!(mapper.partition_nr(11), 2);
        assert_eq!(mapper.first_sequence_nr(1), 6);
        assert_eq!(mapper.last_sequence_nr(1), 10);
    }

    #[test]
    fn test_partition_is_monotonic() {
        let mapper = PartitionMapper::new(3);
        let partitions: Vec<u64> = (1..=20).map(|n| mapper.partition_nr(n)).collect();
        assert!(partitions.windows(2).all(|w| w[0] <= w[1]));
        for n in 1..=20 {
            let p = mapper.partition_nr(n);
            assert!(mapper.first_sequence_nr(p) <= n && n <= mapper.last_sequence_nr(p));
        }
    }

    #[test]
    fn test_next_partition_is_one_partition_size_later() {
        for size in [1, 3, 5, 500_000] {
            let mapper = PartitionMapper::new(size);
            for n in (1..=200).chain([size, size + 1, 10 * size, 10 * size + 1]) {
                assert_eq!(
                    mapper.partition_nr(n + size),
                    mapper.partition_nr(n) + 1,
                    "size {} n {}",
                    size,
                    n
                );
            }
        }
    }

    #[test]
    fn test_partition_is_deterministic() {
        let a = PartitionMapper::new(500_000);
        let b = PartitionMapper::new(500_000);
        for n in [1, 499_999, 500_000, 500_001, 10_000_000] {
            assert_eq!(a.partition_nr(n), b.partition_nr(n));
        }
        assert_eq!(a.partition_nr(500_001), 1);
    }

    #[test]
    fn test_group_by_partition() {
        let mapper = PartitionMapper::new(5);
        let groups = mapper.group_by_partition((3..=12).collect(), |n| *n);
        assert_eq!(
            groups,
            vec![
                (0, vec![3, 4, 5]),
                (1, vec![6, 7, 8, 9, 10]),
                (2, vec![11, 12]),
            ]
        );
    }

    #[test]
    fn test_zero_sequence_nr_maps_to_first_partition() {
        assert_eq!(PartitionMapper::new(5).partition_nr(0), 0);
    }
}
