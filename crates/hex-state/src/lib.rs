use hex_data::{ConsensusThresholds, DetectorKind, Zone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

/// Which consensus rule produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusRule {
    /// Only one detector was available
    SoleDetector,
    HighConfidence,
    StrongMajority,
    SingleHighConfidence,
    WeakConsensus,
    /// Every detector was unavailable
    NoEvidence,
}

/// Fused decision for one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub selected: bool,
    pub confidence: f64,
    /// Weighted share of votes for "selected", in [0, 1]
    pub weighted_votes: f64,
    pub agreement: f64,
    pub supporting: BTreeSet<DetectorKind>,
    pub conflicting: BTreeSet<DetectorKind>,
    pub unavailable: BTreeSet<DetectorKind>,
    pub rule: ConsensusRule,
    pub ambiguous: bool,
    pub reliable: bool,
}

impl ConsensusResult {
    /// True when no detector contributed to the decision
    pub fn has_no_evidence(&self) -> bool {
        self.supporting.is_empty() && self.conflicting.is_empty()
    }

    /// Decisions a human should confirm instead of trusting
    pub fn needs_review(&self) -> bool {
        self.ambiguous || self.has_no_evidence()
    }
}

/// Confidence bucket used for report statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn classify(confidence: f64, thresholds: &ConsensusThresholds) -> Self {
        if confidence >= thresholds.high_confidence {
            ConfidenceBand::High
        } else if confidence >= thresholds.ambiguous {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

/// One slot's entry in a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSelection {
    pub slot_id: String,
    pub zone: Zone,
    pub band: ConfidenceBand,
    pub result: ConsensusResult,
}

/// Aggregate counts over a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportStatistics {
    pub total: usize,
    pub selected: usize,
    pub unselected: usize,
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
    pub ambiguous: usize,
    pub reliable: usize,
    pub needs_review: usize,
    /// Slots that never finished (cancelled batch)
    pub dropped: usize,
}

/// Selection state of every analysed slot in one screenshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionReport {
    pub slots: Vec<SlotSelection>,
    pub statistics: ReportStatistics,
}

impl SelectionReport {
    /// Build a report from finished slots, in the order given.
    pub fn new(
        results: Vec<(String, Zone, ConsensusResult)>,
        dropped: usize,
        thresholds: &ConsensusThresholds,
    ) -> Self {
        let slots: Vec<SlotSelection> = results
            .into_iter()
            .map(|(slot_id, zone, result)| SlotSelection {
                band: ConfidenceBand::classify(result.confidence, thresholds),
                slot_id,
                zone,
                result,
            })
            .collect();

        let mut stats = ReportStatistics {
            total: slots.len(),
            dropped,
            ..Default::default()
        };
        for slot in &slots {
            if slot.result.selected {
                stats.selected += 1;
            } else {
                stats.unselected += 1;
            }
            match slot.band {
                ConfidenceBand::High => stats.high_confidence += 1,
                ConfidenceBand::Medium => stats.medium_confidence += 1,
                ConfidenceBand::Low => stats.low_confidence += 1,
            }
            if slot.result.ambiguous {
                stats.ambiguous += 1;
            }
            if slot.result.reliable {
                stats.reliable += 1;
            }
            if slot.result.needs_review() {
                stats.needs_review += 1;
            }
        }

        Self {
            slots,
            statistics: stats,
        }
    }

    pub fn get(&self, slot_id: &str) -> Option<&ConsensusResult> {
        self.slots
            .iter()
            .find(|s| s.slot_id == slot_id)
            .map(|s| &s.result)
    }

    /// Ids of slots judged selected
    pub fn selected_ids(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|s| s.result.selected)
            .map(|s| s.slot_id.as_str())
            .collect()
    }

    /// Ids of slots that should go to manual review
    pub fn review_ids(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|s| s.result.needs_review())
            .map(|s| s.slot_id.as_str())
            .collect()
    }

    pub fn log_summary(&self) {
        let s = &self.statistics;
        info!(
            "Selection report: {} slot(s), {} selected / {} not, confidence {}/{}/{} \
             (high/medium/low), {} need review, {} dropped",
            s.total,
            s.selected,
            s.unselected,
            s.high_confidence,
            s.medium_confidence,
            s.low_confidence,
            s.needs_review,
            s.dropped
        );
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
