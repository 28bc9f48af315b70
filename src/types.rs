use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// First stage index recorded in [`ScoreResult::stage_bits`].
pub const STAGE_BITS_FIRST: usize = 10;

/// Last stage index (inclusive) recorded in [`ScoreResult::stage_bits`].
pub const STAGE_BITS_LAST: usize = STAGE_BITS_FIRST + 63;

/// An integer pixel offset relative to the window origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SamplePoint {
    pub x: i32,
    pub y: i32,
}

impl SamplePoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Multiply both coordinates by `scale`, rounding to the nearest pixel.
    pub fn scaled(&self, scale: f32) -> Self {
        Self {
            x: (self.x as f32 * scale).round() as i32,
            y: (self.y as f32 * scale).round() as i32,
        }
    }
}

impl std::ops::Add for SamplePoint {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

/// Distance from each tile edge to the object rectangle, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Margins {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl Margins {
    pub const fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }
}

/// The window a cascade was trained on.
///
/// The tile is the full sampled rectangle; the object rectangle sits inside it,
/// inset by the margins. The object size is always derived from the tile and
/// the margins, so the two can never disagree:
///
/// ```text
/// obj_w = tile_w - margin_left - margin_right
/// obj_h = tile_h - margin_top  - margin_bottom
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    tile_w: i32,
    tile_h: i32,
    margins: Margins,
    obj_w: i32,
    obj_h: i32,
}

impl WindowGeometry {
    pub fn new(tile_w: i32, tile_h: i32, margins: Margins) -> Self {
        Self {
            tile_w,
            tile_h,
            margins,
            obj_w: tile_w - margins.left - margins.right,
            obj_h: tile_h - margins.top - margins.bottom,
        }
    }

    pub fn tile_w(&self) -> i32 {
        self.tile_w
    }

    pub fn tile_h(&self) -> i32 {
        self.tile_h
    }

    pub fn obj_w(&self) -> i32 {
        self.obj_w
    }

    pub fn obj_h(&self) -> i32 {
        self.obj_h
    }

    pub fn margins(&self) -> Margins {
        self.margins
    }

    /// Scale the tile and the margins by `scale` (truncating to whole pixels)
    /// and derive the object size from the scaled values.
    pub fn rescaled(&self, scale: f32) -> Self {
        let s = |v: i32| (v as f32 * scale) as i32;
        Self::new(
            s(self.tile_w),
            s(self.tile_h),
            Margins::new(
                s(self.margins.top),
                s(self.margins.right),
                s(self.margins.bottom),
                s(self.margins.left),
            ),
        )
    }

    /// Check that the geometry describes a non-empty object inside a non-empty tile.
    pub fn validate(&self) -> Result<()> {
        let m = &self.margins;
        if self.tile_w <= 0 || self.tile_h <= 0 {
            return Err(Error::InvalidModel(format!(
                "tile size must be positive, got {}x{}",
                self.tile_w, self.tile_h
            )));
        }
        if m.top < 0 || m.right < 0 || m.bottom < 0 || m.left < 0 {
            return Err(Error::InvalidModel(format!(
                "margins must be non-negative, got {:?}",
                m
            )));
        }
        if self.obj_w <= 0 || self.obj_h <= 0 {
            return Err(Error::InvalidModel(format!(
                "margins leave no object area in a {}x{} tile",
                self.tile_w, self.tile_h
            )));
        }
        // Binary models carry the derived fields verbatim.
        if self.obj_w != self.tile_w - m.left - m.right
            || self.obj_h != self.tile_h - m.top - m.bottom
        {
            return Err(Error::InvalidModel(format!(
                "object size {}x{} disagrees with tile and margins",
                self.obj_w, self.obj_h
            )));
        }
        Ok(())
    }
}

/// Outcome of running a cascade over one window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Sum of the votes of every stage that was evaluated.
    pub score: f32,
    /// Index of the last evaluated stage.
    pub stop_stage: usize,
    /// `true` if the window was rejected by the soft cascade.
    pub fail: bool,
    /// Bit `q - 10` is set for every stage `q` in `10..=73` that was reached
    /// without an early exit.
    pub stage_bits: u64,
}

impl ScoreResult {
    pub fn passed(&self) -> bool {
        !self.fail
    }
}

/// Smallest and largest trained object size across a set of models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimits {
    pub min_w: i32,
    pub min_h: i32,
    pub max_w: i32,
    pub max_h: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> WindowGeometry {
        WindowGeometry::new(64, 128, Margins::new(16, 8, 16, 8))
    }

    #[test]
    fn object_size_derived_from_margins() {
        let g = geometry();
        assert_eq!(g.obj_w(), 48);
        assert_eq!(g.obj_h(), 96);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn rescale_keeps_invariant() {
        for scale in [0.37f32, 0.5, 0.9, 1.0, 1.25, 1.7, 3.3] {
            let g = geometry().rescaled(scale);
            let m = g.margins();
            assert_eq!(g.obj_w(), g.tile_w() - m.left - m.right, "scale {}", scale);
            assert_eq!(g.obj_h(), g.tile_h() - m.top - m.bottom, "scale {}", scale);
        }
    }

    #[test]
    fn rescale_by_one_is_identity() {
        assert_eq!(geometry().rescaled(1.0), geometry());
    }

    #[test]
    fn rescale_truncates() {
        let g = WindowGeometry::new(21, 41, Margins::new(3, 3, 3, 3)).rescaled(1.5);
        assert_eq!(g.tile_w(), 31);
        assert_eq!(g.tile_h(), 61);
        assert_eq!(g.margins(), Margins::new(4, 4, 4, 4));
        assert_eq!(g.obj_w(), 23);
        assert_eq!(g.obj_h(), 53);
    }

    #[test]
    fn validate_rejects_oversized_margins() {
        let g = WindowGeometry::new(16, 16, Margins::new(0, 8, 0, 8));
        assert!(g.validate().is_err());

        let g = WindowGeometry::new(16, 16, Margins::new(-1, 0, 0, 0));
        assert!(g.validate().is_err());
    }

    #[test]
    fn sample_point_scaling_rounds() {
        let p = SamplePoint::new(3, 5).scaled(1.5);
        assert_eq!(p, SamplePoint::new(5, 8));
        assert_eq!(SamplePoint::new(-3, 0).scaled(0.5), SamplePoint::new(-2, 0));
    }

    #[test]
    fn score_result_defaults_to_pass() {
        let r = ScoreResult::default();
        assert!(r.passed());
        assert_eq!(r.stop_stage, 0);
        assert_eq!(r.stage_bits, 0);
    }
}
