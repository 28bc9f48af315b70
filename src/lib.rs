//! # icf-cascade
//!
//! Pure Rust boosted soft-cascade classifier over integral channel features.
//!
//! This crate provides:
//! - **Weak classifiers**: depth-2 decision trees over weighted pixel-difference features
//! - **Soft cascade**: sequential stage evaluation with adaptive early reject/accept
//! - **Multiscale dispatch**: picks the smallest trained model that encloses an object
//! - **Persistence**: text (optionally bzip2-compressed) and binary model files
//!
//! ## Algorithm Overview
//!
//! 1. Precompute channel images (e.g. integral LUV/gradient channels) for a frame
//! 2. Select a model for the expected object size
//! 3. For each candidate window, run the cascade stage by stage:
//!    - Each tree adds a vote to the running score
//!    - The window is rejected as soon as the score drops below the stage's
//!      reject threshold, or accepted once it exceeds the approve threshold
//! 4. Windows that survive every stage (or are accepted early) pass
//!
//! Image pyramids, window enumeration and tracking are left to the caller.
//!
//! ## Quick Start
//!
//! ```rust
//! use icf_cascade::{
//!     Branches, CascadeModelBuilder, ChannelImage, DecisionTree, Margins, PairFeature,
//!     SamplePair, SamplePoint, WindowGeometry,
//! };
//!
//! // Load a trained model
//! // let model = icf_cascade::CascadeModel::load("pedestrian_64x128.icf").unwrap();
//!
//! // Or build one in code
//! let root = PairFeature::new(
//!     vec![SamplePair {
//!         channel: 0,
//!         alpha: 1.0,
//!         p1: SamplePoint::new(8, 16),
//!         p2: SamplePoint::new(0, 16),
//!     }],
//!     0.0,
//! );
//! let model = CascadeModelBuilder::new()
//!     .geometry(WindowGeometry::new(16, 32, Margins::new(2, 2, 2, 2)))
//!     .channels(1)
//!     .add_stage(DecisionTree::new(root, Branches::Leaf, [-1.0, 1.0]))
//!     .build()
//!     .unwrap();
//!
//! // Channel data is interleaved; here a single horizontal ramp
//! let channels = ChannelImage::from_fn(64, 64, 1, |x, _, _| x as i32);
//!
//! let result = model.score(&channels.window(10, 10)).unwrap();
//! println!("score {} at stage {}, passed: {}", result.score, result.stop_stage, result.passed());
//! ```
//!
//! ## Custom Channel Buffers
//!
//! Implement the [`ChannelAccess`] trait for your own buffers:
//!
//! ```rust
//! use icf_cascade::ChannelAccess;
//!
//! struct MyChannels { /* ... */ }
//!
//! impl ChannelAccess for MyChannels {
//!     fn value(&self, x: i32, y: i32, channel: usize) -> i32 {
//!         // Return the channel value at (x, y) relative to the window origin
//!         // Return 0 for out-of-range reads
//!         0
//!     }
//!     fn channels(&self) -> usize { 10 }
//! }
//! ```
//!
//! Loaded models are read-only during scoring, so one model can be shared
//! across threads that score independent windows. Rescaling returns a new
//! model and never modifies the trained one.

mod cascade;
mod error;
mod features;
mod model;
mod multiscale;
pub mod text;
mod tree;
mod types;

pub use cascade::Cascade;
pub use error::{Error, Result};
pub use features::{ChannelAccess, ChannelImage, ChannelWindow, PairFeature, ResizeCoeffs, SamplePair};
pub use model::{CascadeModel, CascadeModelBuilder};
pub use multiscale::{MultiscaleCascade, MODEL_EXTENSION};
pub use tree::{Branches, DecisionTree, DEFAULT_APPROVE_THRESHOLD, DEFAULT_REJECT_THRESHOLD};
pub use types::{
    Margins, SamplePoint, ScoreResult, SizeLimits, WindowGeometry, STAGE_BITS_FIRST,
    STAGE_BITS_LAST,
};
