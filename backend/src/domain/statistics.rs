//! Read-only aggregation of identity counts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::partition::Partition;

/// Counts for a single partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionStatistics {
    pub partition: Partition,
    pub total: u64,
    pub by_region: BTreeMap<String, u64>,
    pub by_affiliation: BTreeMap<String, u64>,
}

impl PartitionStatistics {
    pub fn empty(partition: Partition) -> Self {
        Self {
            partition,
            total: 0,
            by_region: BTreeMap::new(),
            by_affiliation: BTreeMap::new(),
        }
    }

    /// Count one identity with the given region and affiliation.
    pub fn record(&mut self, region: &str, affiliation: &str) {
        self.record_many(region, affiliation, 1);
    }

    /// Count `count` identities sharing a region and affiliation.
    pub fn record_many(&mut self, region: &str, affiliation: &str, count: u64) {
        self.total += count;
        *self.by_region.entry(region.to_owned()).or_default() += count;
        *self.by_affiliation.entry(affiliation.to_owned()).or_default() += count;
    }
}

/// Store-wide counts per partition, region, and affiliation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityStatistics {
    pub total: u64,
    pub partitions: Vec<PartitionStatistics>,
    pub by_region: BTreeMap<String, u64>,
    pub by_affiliation: BTreeMap<String, u64>,
}

impl IdentityStatistics {
    /// Merge per-partition counts into store-wide totals.
    pub fn from_partitions(partitions: Vec<PartitionStatistics>) -> Self {
        let mut stats = Self::default();
        for partition in &partitions {
            stats.total += partition.total;
            merge(&mut stats.by_region, &partition.by_region);
            merge(&mut stats.by_affiliation, &partition.by_affiliation);
        }
        stats.partitions = partitions;
        stats
    }

    /// Count for one partition, zero when it was not aggregated.
    pub fn partition_total(&self, partition: Partition) -> u64 {
        self.partitions
            .iter()
            .find(|stats| stats.partition == partition)
            .map_or(0, |stats| stats.total)
    }
}

fn merge(into: &mut BTreeMap<String, u64>, from: &BTreeMap<String, u64>) {
    for (key, count) in from {
        *into.entry(key.clone()).or_default() += count;
    }
}
