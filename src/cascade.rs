use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::features::ChannelAccess;
use crate::tree::DecisionTree;
use crate::types::{ScoreResult, STAGE_BITS_FIRST, STAGE_BITS_LAST};

/// An ordered sequence of weak classifiers evaluated as a soft cascade.
///
/// Stage `q` adds its vote to the running score, then:
/// - rejects if the score falls below `reject_threshold - sensitivity * q / N`
/// - accepts if the score rises above `approve_threshold`
///
/// Both early exits only apply when `soft_cascade` is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cascade {
    stages: Vec<DecisionTree>,
    channels: usize,
    pub soft_cascade: bool,
    pub sensitivity: f32,
}

impl Cascade {
    pub fn new(stages: Vec<DecisionTree>, channels: usize) -> Self {
        Self {
            stages,
            channels,
            soft_cascade: true,
            sensitivity: 0.0,
        }
    }

    pub fn stages(&self) -> &[DecisionTree] {
        &self.stages
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// A cascade can only be scored if it has at least one stage.
    pub fn is_valid(&self) -> bool {
        !self.stages.is_empty()
    }

    /// Run the cascade over one window.
    ///
    /// An empty cascade returns a default result; callers are expected to
    /// check [`Cascade::is_valid`] first.
    pub fn evaluate<A: ChannelAccess + ?Sized>(&self, window: &A, sensitivity: f32) -> ScoreResult {
        let mut res = ScoreResult::default();
        let count = self.stages.len();

        for (q, stage) in self.stages.iter().enumerate() {
            res.stop_stage = q;
            res.score += stage.evaluate(window);

            let reject = stage.reject_threshold - sensitivity * q as f32 / count as f32;
            if self.soft_cascade && res.score < reject {
                res.fail = true;
                break;
            }
            if self.soft_cascade && res.score > stage.approve_threshold {
                res.fail = false;
                break;
            }
            if (STAGE_BITS_FIRST..=STAGE_BITS_LAST).contains(&q) {
                res.stage_bits |= 1u64 << (q - STAGE_BITS_FIRST);
            }
        }

        res
    }

    /// Copy of this cascade with every stage rescaled by `scale`.
    pub fn scaled(&self, scale: f32, lambdas: &[f32]) -> Self {
        Self {
            stages: self
                .stages
                .iter()
                .map(|stage| stage.scaled(scale, lambdas))
                .collect(),
            channels: self.channels,
            soft_cascade: self.soft_cascade,
            sensitivity: self.sensitivity,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for stage in &self.stages {
            stage.validate(self.channels)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{ChannelImage, PairFeature};
    use crate::tree::Branches;
    use approx::assert_abs_diff_eq;

    // A root feature with no pairs responds with -min_val, so the sign is fixed.
    fn constant_stage(vote: f32, reject: f32, approve: f32) -> DecisionTree {
        let root = PairFeature::new(Vec::new(), -1.0);
        DecisionTree::new(root, Branches::Leaf, [0.0, vote]).with_thresholds(reject, approve)
    }

    fn image() -> ChannelImage {
        ChannelImage::from_fn(4, 4, 1, |_, _, _| 0)
    }

    #[test]
    fn rejects_at_first_stage_below_threshold() {
        let stages = vec![
            constant_stage(1.0, -10.0, 100.0),
            constant_stage(-5.0, -3.0, 100.0),
            constant_stage(50.0, -10.0, 100.0),
        ];
        let cascade = Cascade::new(stages, 1);
        let res = cascade.evaluate(&image(), 0.0);

        assert!(res.fail);
        assert_eq!(res.stop_stage, 1);
        // Stage 2 is never evaluated.
        assert_abs_diff_eq!(res.score, -4.0, epsilon = 1e-6);
    }

    #[test]
    fn accepts_early_above_approve_threshold() {
        let stages = vec![
            constant_stage(2.0, -10.0, 1.0),
            constant_stage(-100.0, -10.0, 100.0),
        ];
        let res = Cascade::new(stages, 1).evaluate(&image(), 0.0);

        assert!(!res.fail);
        assert_eq!(res.stop_stage, 0);
        assert_abs_diff_eq!(res.score, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn hard_cascade_runs_every_stage() {
        let stages: Vec<_> = (0..5)
            .map(|_| constant_stage(-100.0, -3.0, 1.0))
            .collect();
        let mut cascade = Cascade::new(stages, 1);
        cascade.soft_cascade = false;

        let res = cascade.evaluate(&image(), 0.0);
        assert!(res.passed());
        assert_eq!(res.stop_stage, 4);
        assert_abs_diff_eq!(res.score, -500.0, epsilon = 1e-3);
    }

    #[test]
    fn sensitivity_relaxes_later_stages() {
        // Score after stage 1 is -4; reject threshold is -3 - s * 1 / 2.
        let stages = vec![
            constant_stage(1.0, -10.0, 100.0),
            constant_stage(-5.0, -3.0, 100.0),
        ];
        let cascade = Cascade::new(stages, 1);

        assert!(cascade.evaluate(&image(), 0.0).fail);
        assert!(cascade.evaluate(&image(), 1.9).fail);

        let relaxed = cascade.evaluate(&image(), 2.2);
        assert!(!relaxed.fail);
        assert_eq!(relaxed.stop_stage, 1);
    }

    #[test]
    fn stage_bits_cover_reached_stages() {
        let stages: Vec<_> = (0..80).map(|_| constant_stage(0.0, -1.0, 1.0)).collect();
        let res = Cascade::new(stages, 1).evaluate(&image(), 0.0);

        assert_eq!(res.stop_stage, 79);
        assert_eq!(res.stage_bits, u64::MAX);

        let mut stages: Vec<_> = (0..20).map(|_| constant_stage(0.0, -1.0, 1.0)).collect();
        stages[12] = constant_stage(-5.0, -1.0, 1.0);
        let res = Cascade::new(stages, 1).evaluate(&image(), 0.0);

        assert!(res.fail);
        assert_eq!(res.stop_stage, 12);
        // Stages 10 and 11 completed; the rejecting stage is not recorded.
        assert_eq!(res.stage_bits, 0b11);
    }

    #[test]
    fn empty_cascade_is_invalid() {
        let cascade = Cascade::new(Vec::new(), 1);
        assert!(!cascade.is_valid());
        assert_eq!(cascade.evaluate(&image(), 0.0), ScoreResult::default());
    }
}
