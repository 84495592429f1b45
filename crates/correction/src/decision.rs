//! Retain / review / remove policy.

use recollect_config::CorrectionConfig;
use recollect_core::ProcessingStatus;
use serde::{Deserialize, Serialize};

/// What the loop decided for one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub status: ProcessingStatus,
    /// Consecutive correction cycles that ended in REVIEW.
    pub review_cycles: u32,
    pub reason: String,
}

impl Decision {
    pub fn is_removal(&self) -> bool {
        self.status == ProcessingStatus::Removed
    }
}

/// Map a fresh score onto a status.
///
/// `prior` and `review_cycles` describe the block before this cycle. The
/// cycle that moves a block into REVIEW starts its count at zero; every
/// further cycle still in the review band adds one, and reaching
/// `max_review_cycles` escalates to removal.
pub fn decide(config: &CorrectionConfig, score: f32, prior: ProcessingStatus, review_cycles: u32) -> Decision {
    if score < config.remove_threshold {
        return Decision {
            status: ProcessingStatus::Removed,
            review_cycles,
            reason: format!(
                "score {score:.2} below remove threshold {:.2}",
                config.remove_threshold
            ),
        };
    }

    if score < config.review_threshold {
        if prior != ProcessingStatus::Review {
            return Decision {
                status: ProcessingStatus::Review,
                review_cycles: 0,
                reason: format!(
                    "score {score:.2} dropped below review threshold {:.2}",
                    config.review_threshold
                ),
            };
        }
        let cycles = review_cycles + 1;
        if cycles >= config.max_review_cycles {
            return Decision {
                status: ProcessingStatus::Removed,
                review_cycles: cycles,
                reason: format!("score {score:.2} not improved after {cycles} review cycles"),
            };
        }
        return Decision {
            status: ProcessingStatus::Review,
            review_cycles: cycles,
            reason: format!(
                "score {score:.2} below review threshold {:.2} (cycle {cycles}/{})",
                config.review_threshold, config.max_review_cycles
            ),
        };
    }

    Decision {
        status: ProcessingStatus::Retained,
        review_cycles: 0,
        reason: format!("score {score:.2} meets review threshold {:.2}", config.review_threshold),
    }
}

/// Placement right after ingestion. Never removes; low scores go to REVIEW.
pub fn initial(config: &CorrectionConfig, score: f32) -> Decision {
    if score < config.review_threshold {
        Decision {
            status: ProcessingStatus::Review,
            review_cycles: 0,
            reason: format!("initial score {score:.2} below review threshold"),
        }
    } else {
        Decision {
            status: ProcessingStatus::Retained,
            review_cycles: 0,
            reason: format!("initial score {score:.2}"),
        }
    }
}
