//! A point-in-time read of an [`Accounting`] table, for reporters.
//!
//! Two totals are captured through different paths: `summed` adds up the
//! owner slots, `aggregate` reads the global counters. They drift apart
//! under slot aliasing and races, and are never reconciled: the drift is the
//! diagnostic.

use std::fmt;

use hashbrown::HashMap;
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    owner::OwnerId,
    stats::{Accounting, SlotUsage},
};

/// Bytes and blocks, signed like the slot counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub bytes: isize,
    pub blocks: isize,
}

impl Usage {
    pub const fn kilobytes(&self) -> isize {
        self.bytes >> 10
    }
}

/// The global counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub used_memory: usize,
    pub memory_block: usize,
}

impl Aggregate {
    pub const fn kilobytes(&self) -> usize {
        self.used_memory >> 10
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Every claimed slot with a non-zero byte balance, in slot order
    pub owners: Vec<SlotUsage>,
    /// The sum of `owners`
    pub summed: Usage,
    /// What the global counters say
    pub aggregate: Aggregate,
}

impl Report {
    /// Read `accounting`. Every counter is read atomically on its own, there
    /// is no consistency across counters.
    pub fn capture<const N: usize>(accounting: &Accounting<N>) -> Self {
        let mut summed = Usage::default();
        let owners: Vec<SlotUsage> = accounting
            .owner_slots()
            .inspect(|usage| {
                summed.bytes = summed.bytes.wrapping_add(usage.allocated_bytes);
                summed.blocks = summed.blocks.wrapping_add(usage.block_count);
            })
            .collect();
        Self {
            owners,
            summed,
            aggregate: Aggregate {
                used_memory: accounting.total_used_bytes(),
                memory_block: accounting.total_block_count(),
            },
        }
    }

    /// `aggregate - summed`: what the owner slots failed to account for
    pub fn drift(&self) -> Usage {
        Usage {
            bytes: (self.aggregate.used_memory as isize).wrapping_sub(self.summed.bytes),
            blocks: (self.aggregate.memory_block as isize).wrapping_sub(self.summed.blocks),
        }
    }

    pub fn owner(&self, owner: OwnerId) -> Option<&SlotUsage> {
        self.owners.iter().find(|usage| usage.owner == owner)
    }

    pub fn by_owner(&self) -> HashMap<OwnerId, SlotUsage> {
        self.owners
            .iter()
            .map(|usage| (usage.owner, *usage))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Emit the report line by line at `info` level
    pub fn log(&self) {
        info!("dump all owner mem:");
        for line in self.to_string().lines() {
            info!("{line}");
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for usage in self.owners.iter() {
            writeln!(
                f,
                "{:#x} -> {}kb, {}",
                usage.owner,
                usage.allocated_bytes >> 10,
                usage.block_count
            )?;
        }
        writeln!(
            f,
            "+total: {}kb, {}",
            self.summed.kilobytes(),
            self.summed.blocks
        )?;
        writeln!(
            f,
            "+total2: {}kb, {}",
            self.aggregate.kilobytes(),
            self.aggregate.memory_block
        )
    }
}
