use serde::{Deserialize, Serialize};

use crate::types::SamplePoint;

/// Trait for reading precomputed channel values around a window origin.
pub trait ChannelAccess {
    /// Value of `channel` at offset (x, y). Returns 0 for out-of-range reads.
    fn value(&self, x: i32, y: i32, channel: usize) -> i32;

    /// Number of interleaved channels.
    fn channels(&self) -> usize;
}

/// A borrowed view into an interleaved channel buffer, anchored at a window origin.
///
/// Element (x, y, c) lives at `data[origin + y * stride + x * channels + c]`,
/// with `stride` counted in elements.
#[derive(Debug, Clone, Copy)]
pub struct ChannelWindow<'a> {
    data: &'a [i32],
    origin: usize,
    stride: usize,
    channels: usize,
}

impl<'a> ChannelWindow<'a> {
    pub fn new(data: &'a [i32], origin: usize, stride: usize, channels: usize) -> Self {
        Self {
            data,
            origin,
            stride,
            channels,
        }
    }
}

impl ChannelAccess for ChannelWindow<'_> {
    #[inline]
    fn value(&self, x: i32, y: i32, channel: usize) -> i32 {
        if channel >= self.channels {
            return 0;
        }
        let offset = y as isize * self.stride as isize
            + x as isize * self.channels as isize
            + channel as isize;
        let idx = self.origin as isize + offset;
        if idx < 0 {
            return 0;
        }
        self.data.get(idx as usize).copied().unwrap_or(0)
    }

    fn channels(&self) -> usize {
        self.channels
    }
}

/// An owned interleaved multi-channel image.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelImage {
    data: Vec<i32>,
    width: u32,
    height: u32,
    channels: usize,
}

impl ChannelImage {
    pub fn new(data: Vec<i32>, width: u32, height: u32, channels: usize) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * channels);
        Self {
            data,
            width,
            height,
            channels,
        }
    }

    pub fn from_fn<F>(width: u32, height: u32, channels: usize, f: F) -> Self
    where
        F: Fn(u32, u32, usize) -> i32,
    {
        let mut data = Vec::with_capacity(width as usize * height as usize * channels);
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    data.push(f(x, y, c));
                }
            }
        }
        Self {
            data,
            width,
            height,
            channels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride in elements.
    pub fn stride(&self) -> usize {
        self.width as usize * self.channels
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.data
    }

    /// View of the image with its origin moved to (x, y).
    pub fn window(&self, x: u32, y: u32) -> ChannelWindow<'_> {
        let origin = y as usize * self.stride() + x as usize * self.channels;
        ChannelWindow::new(&self.data, origin, self.stride(), self.channels)
    }
}

impl ChannelAccess for ChannelImage {
    fn value(&self, x: i32, y: i32, channel: usize) -> i32 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0;
        }
        if channel >= self.channels {
            return 0;
        }
        self.data[y as usize * self.stride() + x as usize * self.channels + channel]
    }

    fn channels(&self) -> usize {
        self.channels
    }
}

/// One weighted sample pair: `alpha * (v(p1) - v(p2))` on `channel`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePair {
    pub channel: usize,
    pub alpha: f32,
    pub p1: SamplePoint,
    pub p2: SamplePoint,
}

/// A weighted multi-point pixel-difference test.
///
/// The response is the weighted sum of the pair differences minus `min_val`,
/// so a decision tree can branch on the sign of the response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PairFeature {
    pub pairs: Vec<SamplePair>,
    pub min_val: f32,
}

impl PairFeature {
    pub fn new(pairs: Vec<SamplePair>, min_val: f32) -> Self {
        Self { pairs, min_val }
    }

    #[inline]
    pub fn evaluate<A: ChannelAccess + ?Sized>(&self, window: &A) -> f32 {
        let mut sum = 0.0f32;
        for pair in &self.pairs {
            let v1 = window.value(pair.p1.x, pair.p1.y, pair.channel);
            let v2 = window.value(pair.p2.x, pair.p2.y, pair.channel);
            sum += pair.alpha * (v1 - v2) as f32;
        }
        sum - self.min_val
    }

    /// Largest channel index referenced by any pair.
    pub fn max_channel(&self) -> Option<usize> {
        self.pairs.iter().map(|p| p.channel).max()
    }

    /// Approximate this feature on an image resampled by `scale`.
    ///
    /// Sample coordinates move with the image; each weight is corrected by
    /// `scale^lambda` for its channel so the response stays comparable to the
    /// trained thresholds.
    pub fn scaled(&self, scale: f32, lambdas: &[f32]) -> Self {
        let pairs = self
            .pairs
            .iter()
            .map(|pair| {
                let lambda = lambdas.get(pair.channel).copied().unwrap_or(0.0);
                SamplePair {
                    channel: pair.channel,
                    alpha: pair.alpha * scale.powf(lambda),
                    p1: pair.p1.scaled(scale),
                    p2: pair.p2.scaled(scale),
                }
            })
            .collect();
        Self {
            pairs,
            min_val: self.min_val,
        }
    }
}

// Power-law exponents: a channel averaged over an image resampled by `s`
// behaves like the original times s^-lambda.
const DOWNSCALE_GRADIENT_LAMBDA: f32 = 0.1158;
const UPSCALE_GRADIENT_LAMBDA: f32 = 1.0;

/// Per-channel exponents used to approximate feature responses at a new scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResizeCoeffs {
    upscale: Vec<f32>,
    downscale: Vec<f32>,
}

impl ResizeCoeffs {
    /// Coefficients for a known channel layout.
    ///
    /// Supported: 1 (gray), 3 (LUV) and 10 (LUV, gradient magnitude and six
    /// orientation bins). Other layouts cannot be rescaled.
    pub fn for_channels(channels: usize) -> Option<Self> {
        let (color, gradient) = match channels {
            1 => (1, 0),
            3 => (3, 0),
            10 => (3, 7),
            _ => return None,
        };

        let build = |gradient_lambda: f32| {
            std::iter::repeat(0.0)
                .take(color)
                .chain(std::iter::repeat(gradient_lambda).take(gradient))
                .collect::<Vec<f32>>()
        };

        Some(Self {
            upscale: build(UPSCALE_GRADIENT_LAMBDA),
            downscale: build(DOWNSCALE_GRADIENT_LAMBDA),
        })
    }

    /// Exponents to use for `scale`: upscale ones above 1.0, downscale otherwise.
    pub fn lambdas(&self, scale: f32) -> &[f32] {
        if scale > 1.0 {
            &self.upscale
        } else {
            &self.downscale
        }
    }

    pub fn channels(&self) -> usize {
        self.upscale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn pair(channel: usize, alpha: f32, p1: (i32, i32), p2: (i32, i32)) -> SamplePair {
        SamplePair {
            channel,
            alpha,
            p1: SamplePoint::new(p1.0, p1.1),
            p2: SamplePoint::new(p2.0, p2.1),
        }
    }

    #[test]
    fn channel_image_access() {
        let img = ChannelImage::from_fn(4, 3, 2, |x, y, c| (x + 10 * y) as i32 + 100 * c as i32);

        assert_eq!(img.value(0, 0, 0), 0);
        assert_eq!(img.value(3, 2, 0), 23);
        assert_eq!(img.value(3, 2, 1), 123);

        // Out of bounds returns 0
        assert_eq!(img.value(-1, 0, 0), 0);
        assert_eq!(img.value(4, 0, 0), 0);
        assert_eq!(img.value(0, 0, 2), 0);
    }

    #[test]
    fn window_offsets_origin() {
        let img = ChannelImage::from_fn(5, 5, 2, |x, y, c| (x + 10 * y) as i32 + 100 * c as i32);
        let win = img.window(2, 1);

        assert_eq!(win.channels(), 2);
        assert_eq!(win.value(0, 0, 0), 12);
        assert_eq!(win.value(1, 2, 1), 133);
        assert_eq!(win.value(-2, -1, 0), 0);
        assert_eq!(win.value(-3, -1, 0), 0);
        assert_eq!(win.value(0, 10, 0), 0);
    }

    #[test]
    fn window_channel_out_of_range_reads_zero() {
        let img = ChannelImage::from_fn(4, 4, 1, |x, y, _| (10 * x + 100 * y) as i32);
        let win = img.window(0, 0);

        assert_eq!(win.value(1, 0, 0), 10);
        // Would otherwise land on the pixel two to the right
        assert_eq!(win.value(0, 0, 2), 0);
        assert_eq!(win.value(0, 0, 1), img.value(0, 0, 1));
    }

    #[test]
    fn feature_response() {
        // Horizontal gradient: value = 10 * x
        let img = ChannelImage::from_fn(8, 8, 1, |x, _, _| 10 * x as i32);

        let feature = PairFeature::new(
            vec![pair(0, 0.5, (6, 0), (2, 0)), pair(0, -1.0, (1, 3), (0, 3))],
            5.0,
        );

        // 0.5 * (60 - 20) - 1.0 * (10 - 0) - 5 = 5
        assert_abs_diff_eq!(feature.evaluate(&img), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn empty_feature_is_negative_min_val() {
        let img = ChannelImage::from_fn(2, 2, 1, |_, _, _| 7);
        let feature = PairFeature::new(Vec::new(), 1.5);
        assert_abs_diff_eq!(feature.evaluate(&img), -1.5, epsilon = 1e-6);
    }

    #[test]
    fn scaling_moves_points_and_corrects_weights() {
        let feature = PairFeature::new(
            vec![pair(0, 2.0, (2, 4), (6, 8)), pair(1, 2.0, (1, 1), (3, 3))],
            0.25,
        );

        let scaled = feature.scaled(2.0, &[0.0, 1.0]);

        assert_eq!(scaled.pairs[0].p1, SamplePoint::new(4, 8));
        assert_eq!(scaled.pairs[0].p2, SamplePoint::new(12, 16));
        assert_abs_diff_eq!(scaled.pairs[0].alpha, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(scaled.pairs[1].alpha, 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(scaled.min_val, 0.25, epsilon = 1e-6);
    }

    #[test]
    fn resize_coeffs_layouts() {
        assert!(ResizeCoeffs::for_channels(1).is_some());
        assert!(ResizeCoeffs::for_channels(3).is_some());
        assert!(ResizeCoeffs::for_channels(4).is_none());
        assert!(ResizeCoeffs::for_channels(0).is_none());

        let coeffs = ResizeCoeffs::for_channels(10).unwrap();
        assert_eq!(coeffs.channels(), 10);
        assert_eq!(coeffs.lambdas(2.0)[0], 0.0);
        assert_eq!(coeffs.lambdas(2.0)[3], UPSCALE_GRADIENT_LAMBDA);
        assert_eq!(coeffs.lambdas(0.5)[9], DOWNSCALE_GRADIENT_LAMBDA);
        assert_eq!(coeffs.lambdas(1.0)[9], DOWNSCALE_GRADIENT_LAMBDA);
    }
}
