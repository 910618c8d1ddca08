//! Historical chain milestones surfaced while a node validates past them.

use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneCategory {
    Genesis,
    Economic,
    Protocol,
    Halving,
    Incident,
}

impl MilestoneCategory {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Genesis => "Genesis",
            Self::Economic => "Economic",
            Self::Protocol => "Protocol upgrade",
            Self::Halving => "Halving",
            Self::Incident => "Incident",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Milestone {
    pub height: u64,
    pub title: &'static str,
    pub description: &'static str,
    pub date: &'static str,
    pub category: MilestoneCategory,
    pub icon: Option<&'static str>,
    pub url: Option<&'static str>,
}

/// Ordered by height.
pub static MILESTONES: &[Milestone] = &[
    Milestone {
        height: 0,
        title: "Genesis Block",
        description: "The first block, carrying a headline about bank bailouts.",
        date: "2009-01-03",
        category: MilestoneCategory::Genesis,
        icon: Some("*"),
        url: None,
    },
    Milestone {
        height: 57_043,
        title: "Bitcoin Pizza Day",
        description: "10,000 BTC paid for two pizzas, the first known purchase of goods.",
        date: "2010-05-22",
        category: MilestoneCategory::Economic,
        icon: Some("$"),
        url: None,
    },
    Milestone {
        height: 74_638,
        title: "Value Overflow Incident",
        description: "A bug minted 184 billion BTC; a patched client orphaned the block within hours.",
        date: "2010-08-15",
        category: MilestoneCategory::Incident,
        icon: Some("!"),
        url: Some("https://en.bitcoin.it/wiki/Value_overflow_incident"),
    },
    Milestone {
        height: 173_805,
        title: "P2SH Activates",
        description: "Pay-to-script-hash (BIP16) makes complex scripts practical.",
        date: "2012-04-01",
        category: MilestoneCategory::Protocol,
        icon: None,
        url: Some("https://github.com/bitcoin/bips/blob/master/bip-0016.mediawiki"),
    },
    Milestone {
        height: 210_000,
        title: "First Halving",
        description: "The block subsidy drops from 50 to 25 BTC.",
        date: "2012-11-28",
        category: MilestoneCategory::Halving,
        icon: Some("/"),
        url: None,
    },
    Milestone {
        height: 363_725,
        title: "Strict DER Signatures",
        description: "BIP66 enforces strict DER encoding for signatures.",
        date: "2015-07-04",
        category: MilestoneCategory::Protocol,
        icon: None,
        url: Some("https://github.com/bitcoin/bips/blob/master/bip-0066.mediawiki"),
    },
    Milestone {
        height: 419_328,
        title: "CSV Activates",
        description: "Relative lock-times (BIP68/112/113) pave the way for payment channels.",
        date: "2016-07-04",
        category: MilestoneCategory::Protocol,
        icon: None,
        url: None,
    },
    Milestone {
        height: 420_000,
        title: "Second Halving",
        description: "The block subsidy drops from 25 to 12.5 BTC.",
        date: "2016-07-09",
        category: MilestoneCategory::Halving,
        icon: Some("/"),
        url: None,
    },
    Milestone {
        height: 481_824,
        title: "SegWit Activates",
        description: "Segregated Witness fixes malleability and raises block capacity.",
        date: "2017-08-24",
        category: MilestoneCategory::Protocol,
        icon: Some("+"),
        url: Some("https://github.com/bitcoin/bips/blob/master/bip-0141.mediawiki"),
    },
    Milestone {
        height: 630_000,
        title: "Third Halving",
        description: "The block subsidy drops from 12.5 to 6.25 BTC.",
        date: "2020-05-11",
        category: MilestoneCategory::Halving,
        icon: Some("/"),
        url: None,
    },
    Milestone {
        height: 709_632,
        title: "Taproot Activates",
        description: "Schnorr signatures and Taproot (BIP340-342) go live.",
        date: "2021-11-14",
        category: MilestoneCategory::Protocol,
        icon: Some("+"),
        url: Some("https://github.com/bitcoin/bips/blob/master/bip-0341.mediawiki"),
    },
    Milestone {
        height: 840_000,
        title: "Fourth Halving",
        description: "The block subsidy drops from 6.25 to 3.125 BTC.",
        date: "2024-04-20",
        category: MilestoneCategory::Halving,
        icon: Some("/"),
        url: None,
    },
];

/// Milestones with `after < height <= through`, ascending.
pub fn milestones_between(after: u64, through: u64) -> impl Iterator<Item = &'static Milestone> {
    MILESTONES
        .iter()
        .filter(move |m| m.height > after && m.height <= through)
}

pub fn next_milestone(height: u64) -> Option<&'static Milestone> {
    MILESTONES.iter().find(|m| m.height > height)
}

/// Tracks which milestones were crossed since the previous poll.
#[derive(Debug, Default)]
pub struct MilestoneWatcher {
    last_checked: Option<u64>,
    dismissed: HashSet<u64>,
}

impl MilestoneWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the most recent newly crossed milestone that was not
    /// dismissed. The first call only sets the baseline.
    pub fn observe(&mut self, height: u64) -> Option<&'static Milestone> {
        let previous = self.last_checked.replace(height)?;
        milestones_between(previous, height)
            .filter(|m| !self.dismissed.contains(&m.height))
            .last()
    }

    pub fn dismiss(&mut self, height: u64) {
        self.dismissed.insert(height);
    }

    /// Forget the baseline; dismissals are kept for the rest of the run.
    pub fn rebase(&mut self) {
        self.last_checked = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted() {
        assert!(MILESTONES.windows(2).all(|w| w[0].height < w[1].height));
    }

    #[test]
    fn baseline_then_segwit_once() {
        let mut watcher = MilestoneWatcher::new();
        assert_eq!(watcher.observe(480_000), None);
        let hit = watcher.observe(482_000).expect("segwit crossed");
        assert_eq!(hit.title, "SegWit Activates");
        assert_eq!(watcher.observe(482_000), None);
        assert_eq!(watcher.observe(482_500), None);
    }

    #[test]
    fn picks_most_recent_and_skips_dismissed() {
        let mut watcher = MilestoneWatcher::new();
        watcher.observe(200_000);
        assert_eq!(
            watcher.observe(425_000).map(|m| m.height),
            Some(420_000)
        );

        let mut watcher = MilestoneWatcher::new();
        watcher.dismiss(420_000);
        watcher.observe(200_000);
        assert_eq!(
            watcher.observe(425_000).map(|m| m.height),
            Some(419_328)
        );
    }

    #[test]
    fn first_poll_never_fires_even_on_a_milestone() {
        let mut watcher = MilestoneWatcher::new();
        assert_eq!(watcher.observe(481_824), None);
        watcher.rebase();
        assert_eq!(watcher.observe(630_000), None);
    }

    #[test]
    fn next_milestone_lookup() {
        assert_eq!(next_milestone(481_824).map(|m| m.height), Some(630_000));
        assert_eq!(next_milestone(u64::MAX), None);
    }
}
