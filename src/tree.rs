use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::features::{ChannelAccess, PairFeature};

/// Default approve threshold; not stored in the text format.
pub const DEFAULT_APPROVE_THRESHOLD: f32 = 1000.0;

/// Default reject threshold.
pub const DEFAULT_REJECT_THRESHOLD: f32 = -3.0;

/// Which second-level nodes a depth-2 tree has.
///
/// In the model files this is a two-bit mask: `0x2` marks a left node,
/// `0x1` a right node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Branches {
    #[default]
    Leaf,
    LeftOnly {
        left: PairFeature,
    },
    RightOnly {
        right: PairFeature,
    },
    Both {
        left: PairFeature,
        right: PairFeature,
    },
}

impl Branches {
    pub const LEFT_BIT: u32 = 0x2;
    pub const RIGHT_BIT: u32 = 0x1;

    pub fn from_parts(left: Option<PairFeature>, right: Option<PairFeature>) -> Self {
        match (left, right) {
            (None, None) => Branches::Leaf,
            (Some(left), None) => Branches::LeftOnly { left },
            (None, Some(right)) => Branches::RightOnly { right },
            (Some(left), Some(right)) => Branches::Both { left, right },
        }
    }

    /// The presence mask as written in model files.
    pub fn mask(&self) -> u32 {
        match self {
            Branches::Leaf => 0,
            Branches::LeftOnly { .. } => Self::LEFT_BIT,
            Branches::RightOnly { .. } => Self::RIGHT_BIT,
            Branches::Both { .. } => Self::LEFT_BIT | Self::RIGHT_BIT,
        }
    }

    pub fn left(&self) -> Option<&PairFeature> {
        match self {
            Branches::LeftOnly { left } | Branches::Both { left, .. } => Some(left),
            _ => None,
        }
    }

    pub fn right(&self) -> Option<&PairFeature> {
        match self {
            Branches::RightOnly { right } | Branches::Both { right, .. } => Some(right),
            _ => None,
        }
    }

    fn map<F>(&self, f: F) -> Self
    where
        F: Fn(&PairFeature) -> PairFeature,
    {
        match self {
            Branches::Leaf => Branches::Leaf,
            Branches::LeftOnly { left } => Branches::LeftOnly { left: f(left) },
            Branches::RightOnly { right } => Branches::RightOnly { right: f(right) },
            Branches::Both { left, right } => Branches::Both {
                left: f(left),
                right: f(right),
            },
        }
    }
}

/// A depth-2 decision tree: one weak classifier of the cascade.
///
/// The tree votes with one of two leaf weights:
/// 1. Evaluate the root feature
/// 2. If positive, consult the right node; otherwise the left node
/// 3. A present node picks `weights[1]` when its own response is positive and
///    `weights[0]` otherwise
/// 4. A missing node falls back to the root's side: `weights[1]` on the right,
///    `weights[0]` on the left
///
/// Both second-level nodes index the weights by their own sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub root: PairFeature,
    pub branches: Branches,
    pub weights: [f32; 2],
    pub reject_threshold: f32,
    pub approve_threshold: f32,
}

impl DecisionTree {
    pub fn new(root: PairFeature, branches: Branches, weights: [f32; 2]) -> Self {
        Self {
            root,
            branches,
            weights,
            reject_threshold: DEFAULT_REJECT_THRESHOLD,
            approve_threshold: DEFAULT_APPROVE_THRESHOLD,
        }
    }

    pub fn with_thresholds(mut self, reject: f32, approve: f32) -> Self {
        self.reject_threshold = reject;
        self.approve_threshold = approve;
        self
    }

    /// Walk the tree and return the chosen leaf weight.
    ///
    /// `response` computes the scalar response of a feature; it is called at
    /// most twice, and never for an absent node.
    #[inline]
    pub fn predict<F>(&self, response: F) -> f32
    where
        F: Fn(&PairFeature) -> f32,
    {
        let positive = response(&self.root) > 0.0;
        match (&self.branches, positive) {
            (Branches::RightOnly { right } | Branches::Both { right, .. }, true) => {
                self.leaf(response(right))
            }
            (_, true) => self.weights[1],
            (Branches::LeftOnly { left } | Branches::Both { left, .. }, false) => {
                self.leaf(response(left))
            }
            (_, false) => self.weights[0],
        }
    }

    #[inline]
    pub fn evaluate<A: ChannelAccess + ?Sized>(&self, window: &A) -> f32 {
        self.predict(|feature| feature.evaluate(window))
    }

    #[inline]
    fn leaf(&self, child_response: f32) -> f32 {
        self.weights[(child_response > 0.0) as usize]
    }

    /// Iterate over every present feature, root first.
    pub fn features(&self) -> impl Iterator<Item = &PairFeature> {
        std::iter::once(&self.root)
            .chain(self.branches.left())
            .chain(self.branches.right())
    }

    /// Copy of this tree with every present feature rescaled.
    pub fn scaled(&self, scale: f32, lambdas: &[f32]) -> Self {
        Self {
            root: self.root.scaled(scale, lambdas),
            branches: self.branches.map(|f| f.scaled(scale, lambdas)),
            weights: self.weights,
            reject_threshold: self.reject_threshold,
            approve_threshold: self.approve_threshold,
        }
    }

    /// Check every feature against the cascade's channel count.
    pub fn validate(&self, channels: usize) -> Result<()> {
        for feature in self.features() {
            if let Some(channel) = feature.max_channel() {
                if channel >= channels {
                    return Err(Error::InvalidModel(format!(
                        "feature samples channel {} of a {}-channel cascade",
                        channel, channels
                    )));
                }
            }
        }
        Ok(())
    }
}
