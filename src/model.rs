use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cascade::Cascade;
use crate::error::{Error, Result};
use crate::features::{ChannelAccess, ResizeCoeffs};
use crate::text;
use crate::tree::DecisionTree;
use crate::types::{ScoreResult, WindowGeometry};

/// A cascade trained for one window size.
///
/// The model consists of:
/// - The stage sequence and its soft-cascade settings
/// - The geometry of the window it was trained on
/// - Rescale coefficients, if the channel layout supports approximate rescaling
///
/// # Usage
///
/// ```ignore
/// let model = CascadeModel::load("pedestrian_64x128.icf")?;
/// let window = channels.window(x, y);
/// let result = model.score(&window)?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeModel {
    cascade: Cascade,
    geometry: WindowGeometry,
    #[serde(skip)]
    resize_coeffs: Option<ResizeCoeffs>,
}

impl CascadeModel {
    /// Create a model; rescale coefficients are derived from the channel count.
    pub fn new(cascade: Cascade, geometry: WindowGeometry) -> Self {
        let resize_coeffs = ResizeCoeffs::for_channels(cascade.channels());
        Self {
            cascade,
            geometry,
            resize_coeffs,
        }
    }

    /// A model with no stages, as left behind by a failed load.
    pub fn invalid(geometry: WindowGeometry, channels: usize) -> Self {
        Self::new(Cascade::new(Vec::new(), channels), geometry)
    }

    /// Load a model from a text file; `*.bz2` files are decompressed on the fly.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        text::load_model(path)
    }

    /// Load a model from a text file, logging and returning an invalid model on failure.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!("Wrong cascade file {}: {}", path.display(), e);
                Self::invalid(WindowGeometry::new(0, 0, Default::default()), 0)
            }
        }
    }

    /// Save the model in the text format.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        text::write_model(self, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Load a model from a binary file.
    pub fn load_binary<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let stored: Self = bincode::deserialize(&bytes)?;
        // Rescale coefficients follow from the channel layout, as for text models.
        let model = Self::new(stored.cascade, stored.geometry);
        model.validate()?;
        Ok(model)
    }

    /// Save the model to a binary file.
    pub fn save_binary<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let bytes = bincode::serialize(self)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    pub fn cascade(&self) -> &Cascade {
        &self.cascade
    }

    pub fn cascade_mut(&mut self) -> &mut Cascade {
        &mut self.cascade
    }

    pub fn geometry(&self) -> &WindowGeometry {
        &self.geometry
    }

    pub fn channels(&self) -> usize {
        self.cascade.channels()
    }

    pub fn num_stages(&self) -> usize {
        self.cascade.num_stages()
    }

    pub fn is_valid(&self) -> bool {
        self.cascade.is_valid()
    }

    pub fn is_resizable(&self) -> bool {
        self.resize_coeffs.is_some()
    }

    /// Score one window with the cascade's own sensitivity.
    pub fn score<A: ChannelAccess + ?Sized>(&self, window: &A) -> Result<ScoreResult> {
        self.score_with(window, self.cascade.sensitivity)
    }

    /// Score one window with an explicit sensitivity.
    pub fn score_with<A: ChannelAccess + ?Sized>(
        &self,
        window: &A,
        sensitivity: f32,
    ) -> Result<ScoreResult> {
        if !self.is_valid() {
            return Err(Error::EmptyCascade);
        }
        if window.channels() < self.channels() {
            return Err(Error::ChannelMismatch {
                model: self.channels(),
                window: window.channels(),
            });
        }
        Ok(self.cascade.evaluate(window, sensitivity))
    }

    /// Approximate this model at a new window scale.
    ///
    /// Rescaling is lossy: always rescale the trained model, never a rescaled
    /// copy. Invalid and non-resizable models are refused and left untouched.
    pub fn rescaled(&self, scale: f32) -> Result<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            tracing::warn!("cannot create scaled ICF cascade: scale {}", scale);
            return Err(Error::InvalidScale(scale));
        }
        if !self.is_valid() {
            tracing::warn!("cannot create scaled ICF cascade: model has no stages");
            return Err(Error::EmptyCascade);
        }
        let Some(coeffs) = &self.resize_coeffs else {
            tracing::warn!(
                "cannot create scaled ICF cascade: no rescale coefficients for {} channels",
                self.channels()
            );
            return Err(Error::NotResizable {
                channels: self.channels(),
            });
        };

        Ok(Self {
            cascade: self.cascade.scaled(scale, coeffs.lambdas(scale)),
            geometry: self.geometry.rescaled(scale),
            resize_coeffs: self.resize_coeffs.clone(),
        })
    }

    /// Structural checks shared by every loader.
    pub fn validate(&self) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::EmptyCascade);
        }
        self.geometry.validate()?;
        self.cascade.validate()?;
        if let Some(coeffs) = &self.resize_coeffs {
            if coeffs.channels() != self.channels() {
                return Err(Error::InvalidModel(format!(
                    "rescale coefficients for {} channels in a {}-channel model",
                    coeffs.channels(),
                    self.channels()
                )));
            }
        }
        Ok(())
    }
}

/// Builder for creating a CascadeModel in code.
pub struct CascadeModelBuilder {
    geometry: Option<WindowGeometry>,
    channels: usize,
    stages: Vec<DecisionTree>,
    soft_cascade: bool,
    sensitivity: f32,
}

impl CascadeModelBuilder {
    pub fn new() -> Self {
        Self {
            geometry: None,
            channels: 1,
            stages: Vec::new(),
            soft_cascade: true,
            sensitivity: 0.0,
        }
    }

    /// Set the trained window geometry.
    pub fn geometry(mut self, geometry: WindowGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Set the number of input channels.
    pub fn channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    /// Append a stage to the cascade.
    pub fn add_stage(mut self, stage: DecisionTree) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn soft_cascade(mut self, enabled: bool) -> Self {
        self.soft_cascade = enabled;
        self
    }

    pub fn sensitivity(mut self, sensitivity: f32) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// Build and validate the CascadeModel.
    pub fn build(self) -> Result<CascadeModel> {
        let geometry = self
            .geometry
            .ok_or_else(|| Error::InvalidModel("Missing window geometry".into()))?;

        if self.stages.is_empty() {
            return Err(Error::InvalidModel(
                "Cascade must have at least one stage".into(),
            ));
        }

        let mut cascade = Cascade::new(self.stages, self.channels);
        cascade.soft_cascade = self.soft_cascade;
        cascade.sensitivity = self.sensitivity;

        let model = CascadeModel::new(cascade, geometry);
        model.validate()?;
        Ok(model)
    }
}

impl Default for CascadeModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
