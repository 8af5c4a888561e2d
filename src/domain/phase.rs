use crate::domain::models::TimeBlock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockPhase {
    Upcoming,
    Ongoing,
    Previous,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseFilter {
    #[default]
    All,
    Upcoming,
    Ongoing,
    Previous,
}

impl PhaseFilter {
    /// Unknown or blank filters list everything.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|raw| raw.trim().to_ascii_lowercase()).as_deref() {
            Some("upcoming") => Self::Upcoming,
            Some("ongoing") => Self::Ongoing,
            Some("previous") => Self::Previous,
            _ => Self::All,
        }
    }

    pub fn accepts(self, phase: BlockPhase) -> bool {
        match self {
            Self::All => true,
            Self::Upcoming => phase == BlockPhase::Upcoming,
            Self::Ongoing => phase == BlockPhase::Ongoing,
            Self::Previous => phase == BlockPhase::Previous,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ListedBlock {
    #[serde(flatten)]
    pub block: TimeBlock,
    pub phase: BlockPhase,
}

/// `Ongoing` includes both `start` and `end`.
pub fn classify(now: DateTime<Utc>, block: &TimeBlock) -> BlockPhase {
    if now < block.start_at {
        BlockPhase::Upcoming
    } else if now <= block.end_at {
        BlockPhase::Ongoing
    } else {
        BlockPhase::Previous
    }
}

/// Classifies, filters and orders blocks for listing.
///
/// `Previous` is ordered by `end` descending (most recent first); every other
/// filter is ordered by `start` ascending.
pub fn list_by_phase(
    now: DateTime<Utc>,
    blocks: Vec<TimeBlock>,
    filter: PhaseFilter,
) -> Vec<ListedBlock> {
    let mut listed = blocks
        .into_iter()
        .map(|block| {
            let phase = classify(now, &block);
            ListedBlock { block, phase }
        })
        .filter(|listed| filter.accepts(listed.phase))
        .collect::<Vec<_>>();

    match filter {
        PhaseFilter::Previous => listed.sort_by_key(|listed| {
            (
                Reverse(listed.block.end_at),
                Reverse(listed.block.start_at),
                listed.block.id.clone(),
            )
        }),
        _ => listed.sort_by(|left, right| {
            left.block
                .start_at
                .cmp(&right.block.start_at)
                .then_with(|| left.block.id.cmp(&right.block.id))
        }),
    }
    listed
}
