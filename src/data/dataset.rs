use std::path::Path;

use anyhow::Result;
use burn::data::dataset::Dataset;
use rand::Rng;

use crate::data::{
    preprocessor::PreprocessorKind,
    sampler::limit_samples,
    templatizer::{TemplatizedInstance, Templatizer},
};

/// In-memory dataset of templatized instances.
pub struct TriggerDataset {
    samples: Vec<TemplatizedInstance>,
}

impl TriggerDataset {
    pub fn new(samples: Vec<TemplatizedInstance>) -> Self { Self { samples } }

    pub fn sample_count(&self) -> usize { self.samples.len() }
}

impl Dataset<TemplatizedInstance> for TriggerDataset {
    fn get(&self, index: usize) -> Option<TemplatizedInstance> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Read a dataset file, templatize every record and optionally keep
/// a random subset of `limit` instances. Records the templatizer
/// rejects are skipped with a warning.
pub fn load_trigger_dataset<R: Rng + ?Sized>(
    path:         &Path,
    templatizer:  &Templatizer,
    preprocessor: Option<PreprocessorKind>,
    limit:        Option<usize>,
    rng:          &mut R,
) -> Result<TriggerDataset> {
    let kind = match preprocessor {
        Some(kind) => kind,
        None       => PreprocessorKind::from_path(path)?,
    };
    let instances = kind.reader(path).read_all()?;

    let mut samples = Vec::with_capacity(instances.len());
    for instance in &instances {
        match templatizer.templatize(instance) {
            Ok(sample) => samples.push(sample),
            Err(e) => tracing::warn!("Skipping instance {:?}: {}", instance, e),
        }
    }

    let samples = limit_samples(samples, limit, rng);
    tracing::info!(
        "Loaded {} instances from '{}' ({} read)",
        samples.len(),
        path.display(),
        instances.len()
    );
    Ok(TriggerDataset::new(samples))
}
