//! Batches and the sources that hand them to the controller
//!
//! The controller does not care how data is loaded; it asks a [`DataSource`]
//! for the batches of one split at a time. Two sources ship with the crate:
//! a fixed in-memory one and a seeded synthetic multi-label problem used by
//! the command line.

use std::collections::HashMap;

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use tracing::debug;

use crate::config::DataConfig;
use crate::error::{Error, Result};
use crate::training::{ClassNames, Phase};

/// One mini-batch
#[derive(Debug, Clone)]
pub struct Batch {
    /// Features `[batch, input_dim]`
    pub inputs: Tensor,
    /// Binary labels `[batch, num_classes]`
    pub targets: Tensor,
}

impl Batch {
    /// Pair inputs with their labels
    pub fn new(inputs: Tensor, targets: Tensor) -> Self {
        Self { inputs, targets }
    }

    /// Samples in the batch
    pub fn len(&self) -> usize {
        self.targets.dims().first().copied().unwrap_or(0)
    }

    /// Whether the batch holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Provider of per-split batches
pub trait DataSource {
    /// Label names in model output order
    fn class_names(&self) -> ClassNames;

    /// Batches for one pass over `split`
    fn batches(&mut self, split: Phase) -> Result<Vec<Batch>>;
}

/// Fixed batches per split
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataSource {
    class_names: ClassNames,
    splits: HashMap<Phase, Vec<Batch>>,
}

impl InMemoryDataSource {
    /// Source with no batches
    pub fn new(class_names: ClassNames) -> Self {
        Self {
            class_names,
            splits: HashMap::new(),
        }
    }

    /// Set the batches of a split
    pub fn with_split(mut self, split: Phase, batches: Vec<Batch>) -> Self {
        self.splits.insert(split, batches);
        self
    }
}

impl DataSource for InMemoryDataSource {
    fn class_names(&self) -> ClassNames {
        self.class_names.clone()
    }

    fn batches(&mut self, split: Phase) -> Result<Vec<Batch>> {
        Ok(self.splits.get(&split).cloned().unwrap_or_default())
    }
}

struct Samples {
    features: Vec<Vec<f32>>,
    labels: Vec<Vec<f32>>,
}

/// Seeded multi-label problem with a hidden linear labeller
///
/// Each label is `x · w_c + b_c > 0` for a random `w_c`, flipped with
/// probability `label_noise`. Training batches are reshuffled on every pass.
pub struct SyntheticDataSource {
    class_names: ClassNames,
    batch_size: usize,
    device: Device,
    rng: StdRng,
    splits: HashMap<Phase, Samples>,
}

impl SyntheticDataSource {
    /// Generate every split up front
    pub fn new(config: &DataConfig, seed: u64, device: Device) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::config("data.batch_size must be > 0"));
        }
        let class_names = ClassNames::new(config.resolved_class_names());
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0f32, 1.0)
            .map_err(|e| Error::config(format!("Invalid normal distribution: {e}")))?;

        let weights: Vec<Vec<f32>> = (0..config.num_classes)
            .map(|_| (0..config.input_dim).map(|_| rng.sample(normal)).collect())
            .collect();
        // negative biases keep the labels sparse
        let biases: Vec<f32> = (0..config.num_classes)
            .map(|_| rng.random_range(-1.0f32..0.25))
            .collect();

        let mut splits = HashMap::new();
        for (split, count) in [
            (Phase::Train, config.train_samples),
            (Phase::Validate, config.val_samples),
            (Phase::Test, config.test_samples),
        ] {
            let mut features = Vec::with_capacity(count);
            let mut labels = Vec::with_capacity(count);
            for _ in 0..count {
                let x: Vec<f32> = (0..config.input_dim).map(|_| rng.sample(normal)).collect();
                let y: Vec<f32> = weights
                    .iter()
                    .zip(&biases)
                    .map(|(w, b)| {
                        let score: f32 = w.iter().zip(&x).map(|(wi, xi)| wi * xi).sum::<f32>() + b;
                        let label = score > 0.0;
                        let flipped = rng.random::<f64>() < config.label_noise;
                        if label != flipped {
                            1.0
                        } else {
                            0.0
                        }
                    })
                    .collect();
                features.push(x);
                labels.push(y);
            }
            splits.insert(split, Samples { features, labels });
        }

        debug!(
            classes = class_names.len(),
            train = config.train_samples,
            val = config.val_samples,
            test = config.test_samples,
            "generated synthetic data"
        );

        Ok(Self {
            class_names,
            batch_size: config.batch_size,
            device,
            rng,
            splits,
        })
    }

    /// Samples in a split
    pub fn num_samples(&self, split: Phase) -> usize {
        self.splits.get(&split).map(|s| s.features.len()).unwrap_or(0)
    }
}

impl DataSource for SyntheticDataSource {
    fn class_names(&self) -> ClassNames {
        self.class_names.clone()
    }

    fn batches(&mut self, split: Phase) -> Result<Vec<Batch>> {
        let Some(samples) = self.splits.get(&split) else {
            return Ok(Vec::new());
        };
        let mut order: Vec<usize> = (0..samples.features.len()).collect();
        if split == Phase::Train {
            order.shuffle(&mut self.rng);
        }

        order
            .chunks(self.batch_size)
            .map(|chunk| -> Result<Batch> {
                let rows = chunk.len();
                let input_dim = samples.features[chunk[0]].len();
                let num_classes = samples.labels[chunk[0]].len();
                let inputs: Vec<f32> = chunk
                    .iter()
                    .flat_map(|&i| samples.features[i].iter().copied())
                    .collect();
                let targets: Vec<f32> = chunk
                    .iter()
                    .flat_map(|&i| samples.labels[i].iter().copied())
                    .collect();
                Ok(Batch::new(
                    Tensor::from_vec(inputs, (rows, input_dim), &self.device)?,
                    Tensor::from_vec(targets, (rows, num_classes), &self.device)?,
                ))
            })
            .collect()
    }
}
