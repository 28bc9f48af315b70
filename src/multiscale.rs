use std::fs;
use std::path::Path;

use crate::model::CascadeModel;
use crate::types::SizeLimits;

/// File extension of text cascade models.
pub const MODEL_EXTENSION: &str = "icf";

/// A family of cascades, one per trained window size.
///
/// Models are kept sorted by tile height, then tile width, so the first model
/// that can hold an object is also the smallest one.
#[derive(Debug, Clone, Default)]
pub struct MultiscaleCascade {
    models: Vec<CascadeModel>,
    limits: Option<SizeLimits>,
}

impl MultiscaleCascade {
    /// Build a dispatcher from already loaded models.
    ///
    /// Models that fail the loaders' structural checks (no stages, empty
    /// object area, out-of-range channels) are dropped.
    pub fn from_models(models: Vec<CascadeModel>) -> Self {
        let mut models: Vec<CascadeModel> = models
            .into_iter()
            .filter(|m| match m.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("dropping cascade: {}", e);
                    false
                }
            })
            .collect();
        models.sort_by_key(|m| (m.geometry().tile_h(), m.geometry().tile_w()));
        let limits = size_limits(&models);
        Self { models, limits }
    }

    /// Load every model of `family` found in `dir`.
    ///
    /// A model file is a regular file whose name contains `family` and ends in
    /// `.icf` or `.icf.bz2`. Files that fail to load are skipped with a warning.
    /// A missing directory leaves the dispatcher empty and invalid.
    pub fn load<P: AsRef<Path>>(dir: P, family: &str) -> Self {
        let dir = dir.as_ref();
        if !dir.exists() {
            tracing::warn!("classifier directory {} is not found", dir.display());
            return Self::default();
        }
        if !dir.is_dir() {
            tracing::warn!("classifier directory {} is a regular file", dir.display());
            return Self::default();
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("cannot read classifier directory {}: {}", dir.display(), e);
                return Self::default();
            }
        };

        let mut models = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    tracing::warn!("skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !path.is_file() || !is_family_model(&path, family) {
                continue;
            }

            match CascadeModel::load(&path) {
                Ok(model) => models.push(model),
                Err(e) => tracing::warn!("Wrong cascade file {}: {}", path.display(), e),
            }
        }

        let dispatcher = Self::from_models(models);
        tracing::info!(
            "Loaded {} cascade(s) of family {:?} from {}",
            dispatcher.len(),
            family,
            dir.display()
        );
        dispatcher
    }

    /// At least one model loaded.
    pub fn is_valid(&self) -> bool {
        !self.models.is_empty()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn models(&self) -> &[CascadeModel] {
        &self.models
    }

    pub fn get(&self, index: usize) -> Option<&CascadeModel> {
        self.models.get(index)
    }

    /// Smallest and largest trained object size, if any model is loaded.
    pub fn size_limits(&self) -> Option<SizeLimits> {
        self.limits
    }

    /// Index of the smallest model whose trained object is at least
    /// `obj_w` x `obj_h`.
    ///
    /// Fitting needs both dimensions, which no single sort key orders, so
    /// this is a linear scan.
    pub fn select_model(&self, obj_w: i32, obj_h: i32) -> Option<usize> {
        self.models.iter().position(|m| {
            let g = m.geometry();
            g.obj_w() >= obj_w && g.obj_h() >= obj_h
        })
    }

    /// The model chosen by [`MultiscaleCascade::select_model`].
    pub fn select(&self, obj_w: i32, obj_h: i32) -> Option<&CascadeModel> {
        self.select_model(obj_w, obj_h).map(|i| &self.models[i])
    }
}

fn is_family_model(path: &Path, family: &str) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if !name.contains(family) {
        return false;
    }
    let stem = name.strip_suffix(".bz2").unwrap_or(name);
    Path::new(stem)
        .extension()
        .is_some_and(|ext| ext == MODEL_EXTENSION)
}

fn size_limits(models: &[CascadeModel]) -> Option<SizeLimits> {
    let first = models.first()?.geometry();
    let init = SizeLimits {
        min_w: first.obj_w(),
        min_h: first.obj_h(),
        max_w: first.obj_w(),
        max_h: first.obj_h(),
    };
    Some(models.iter().fold(init, |acc, m| {
        let g = m.geometry();
        SizeLimits {
            min_w: acc.min_w.min(g.obj_w()),
            min_h: acc.min_h.min(g.obj_h()),
            max_w: acc.max_w.max(g.obj_w()),
            max_h: acc.max_h.max(g.obj_h()),
        }
    }))
}
