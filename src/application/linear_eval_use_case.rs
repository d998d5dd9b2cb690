// ============================================================
// Layer 2 — LinearEvalUseCase
// ============================================================
// Scores a trained backbone with a linear probe:
//
//   Step 1: Seed every random source
//   Step 2: Prepare the dataset                (Layer 4 - data)
//   Step 3: Rebuild the network, load weights  (Layers 5 and 6)
//   Step 4: Encode the training split          (Layer 5 - ml)
//   Step 5: Fit the linear classifier          (Layer 5 - ml)
//   Step 6: Test top-1 (and optional top-k)    (Layer 5 - ml)
//
// Only the backbone's features() sub-call is used, so the saved
// classifier head is never evaluated.

use anyhow::{bail, Result};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::application::dataset_prep::{build_loader, prepare_splits};
use crate::data::{
    batcher::ImageBatcher,
    dataset::ImageDataset,
    labels::load_indices,
    loader::{DatasetKind, DatasetLoader},
};
use crate::domain::traits::DatasetSource;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    backend::{select_device, TrainBackend},
    linear_probe::{
        extract_features, test_classifier, top_k_accuracy, train_classifier,
        LinearEvalReport, ProbeConfig,
    },
    model::{Architecture, Network, NetworkConfig},
};

/// Written next to every checkpoint by the buffer workflow.
const NETWORK_CONFIG_FILE: &str = "network_config.json";

// ─── Linear Evaluation Configuration ─────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearEvalConfig {
    pub dataset:     String,
    pub data_path:   PathBuf,
    pub model:       String,
    /// Backbone weights; a fresh random network is probed when absent.
    pub checkpoint:  Option<PathBuf>,
    pub batch_size:  usize,
    pub le_iters:    usize,
    pub reg_weight:  f64,
    pub seed:        u64,
    pub zca:         bool,
    pub subset:      Option<PathBuf>,
    pub distill_idx: Option<PathBuf>,
    pub device:      usize,
    pub top_k:       Vec<usize>,
}

impl Default for LinearEvalConfig {
    fn default() -> Self {
        Self {
            dataset:     "CIFAR100".to_string(),
            data_path:   PathBuf::from("data"),
            model:       "ConvNet".to_string(),
            checkpoint:  None,
            batch_size:  256,
            le_iters:    20,
            reg_weight:  1e-3,
            seed:        0,
            zca:         false,
            subset:      None,
            distill_idx: None,
            device:      0,
            top_k:       Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinearEvalOutcome {
    pub report: LinearEvalReport,
    /// (k, accuracy) for every requested k.
    pub top_k:  Vec<(usize, f64)>,
}

// ─── LinearEvalUseCase ───────────────────────────────────────────────────────
pub struct LinearEvalUseCase {
    config: LinearEvalConfig,
}

impl LinearEvalUseCase {
    pub fn new(config: LinearEvalConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<LinearEvalOutcome> {
        let kind   = self.config.dataset.parse::<DatasetKind>()?;
        let source = DatasetLoader::new(kind, &self.config.data_path);
        let device = select_device(self.config.device);
        self.run::<TrainBackend>(&source, kind, device)
    }

    pub fn run<B: AutodiffBackend>(
        &self,
        source: &dyn DatasetSource,
        kind:   DatasetKind,
        device: B::Device,
    ) -> Result<LinearEvalOutcome> {
        let cfg = &self.config;

        // ── Step 1: Seed ──────────────────────────────────────────────────────
        B::seed(cfg.seed);

        // ── Step 2: Dataset ───────────────────────────────────────────────────
        let data = prepare_splits::<B::InnerBackend>(
            source, kind, cfg.zca, cfg.subset.as_deref(), &device,
        )?;
        let num_classes = data.info.num_classes;
        let (c, h, w)   = (data.info.channels, data.info.height, data.info.width);

        let distill = cfg.distill_idx.as_deref().map(load_indices).transpose()?;
        let batcher = ImageBatcher::<B::InnerBackend>::new(device.clone(), c, h, w);
        let train_loader = build_loader(
            ImageDataset::with_class_labels(data.train, num_classes)?,
            distill,
            batcher.clone(),
            cfg.batch_size,
            None,
            0,
        )?;
        let test_loader = build_loader(
            ImageDataset::with_class_labels(data.test, num_classes)?,
            None,
            batcher,
            cfg.batch_size,
            None,
            0,
        )?;

        // ── Step 3: Backbone ──────────────────────────────────────────────────
        let net_cfg = self.network_config(c, h, w, num_classes)?;
        let network: Network<B::InnerBackend> = net_cfg.init(&device);
        let network = match &cfg.checkpoint {
            Some(path) => {
                tracing::info!("Loading backbone weights from '{}'", path.display());
                CheckpointManager::load_network(path, network, &device)?
            }
            None => {
                tracing::warn!("No checkpoint given; probing a randomly initialised {}", cfg.model);
                network
            }
        };

        // ── Step 4: Features ──────────────────────────────────────────────────
        let (features, labels) = extract_features(&network, &train_loader)?;
        tracing::info!("Feature matrix {:?}, labels {:?}", features.dims(), labels.dims());
        if features.dims()[1] != net_cfg.feature_dim() {
            bail!(
                "backbone produced {} features, expected {}",
                features.dims()[1], net_cfg.feature_dim()
            );
        }

        // ── Step 5: Linear classifier ─────────────────────────────────────────
        let probe = ProbeConfig { reg_weight: cfg.reg_weight, iterations: cfg.le_iters, seed: cfg.seed };
        let classifier = train_classifier::<B>(features, labels, num_classes, &probe, &device)?;

        // ── Step 6: Test ──────────────────────────────────────────────────────
        let report = test_classifier(&network, &classifier, &test_loader)?;
        tracing::info!("Linear evaluation accuracy: {:.3}%", report.accuracy);

        let top_k = if cfg.top_k.is_empty() {
            Vec::new()
        } else {
            let (test_features, test_labels) = extract_features(&network, &test_loader)?;
            let logits = classifier.forward(test_features);
            let accs   = top_k_accuracy(logits, test_labels, &cfg.top_k)?;
            cfg.top_k.iter().copied().zip(accs).collect()
        };

        Ok(LinearEvalOutcome { report, top_k })
    }

    /// The architecture the checkpoint was trained with: its saved
    /// network config when present, otherwise `--model`.
    fn network_config(&self, c: usize, h: usize, w: usize, num_classes: usize) -> Result<NetworkConfig> {
        let saved = self
            .config
            .checkpoint
            .as_deref()
            .and_then(Path::parent)
            .map(|dir| dir.join(NETWORK_CONFIG_FILE))
            .filter(|path| path.exists());

        match saved {
            Some(path) => {
                let net_cfg: NetworkConfig = CheckpointManager::load_config(&path)?;
                if (net_cfg.channels, net_cfg.height, net_cfg.width) != (c, h, w) {
                    bail!(
                        "checkpoint expects {}x{}x{} images but the dataset has {}x{}x{}",
                        net_cfg.channels, net_cfg.height, net_cfg.width, c, h, w
                    );
                }
                tracing::info!("Using network config from '{}'", path.display());
                Ok(net_cfg)
            }
            None => {
                let arch = self.config.model.parse::<Architecture>()?;
                Ok(NetworkConfig::for_architecture(arch, c, h, w, num_classes))
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    use crate::domain::image_split::{DatasetInfo, ImageSplit};

    /// Two classes told apart by which half of the image is bright.
    struct HalvesSource;

    impl DatasetSource for HalvesSource {
        fn load(&self) -> Result<(DatasetInfo, ImageSplit, ImageSplit)> {
            let split = |n: usize| {
                let mut images = Vec::with_capacity(n * 16);
                for i in 0..n {
                    for p in 0..16 {
                        let left = p % 4 < 2;
                        images.push(if (i % 2 == 0) == left { 1.0 } else { 0.0 });
                    }
                }
                ImageSplit::new(1, 4, 4, images, (0..n).map(|i| i % 2).collect())
            };
            let info = DatasetInfo {
                name: "MNIST".into(), channels: 1, height: 4, width: 4, num_classes: 2,
            };
            Ok((info, split(16)?, split(8)?))
        }
    }

    fn config() -> LinearEvalConfig {
        LinearEvalConfig {
            dataset:    "MNIST".into(),
            model:      "ConvNetD1".into(),
            batch_size: 5,
            le_iters:   5,
            top_k:      vec![1, 2],
            ..Default::default()
        }
    }

    #[test]
    fn test_probe_on_random_backbone() {
        let outcome = LinearEvalUseCase::new(config())
            .run::<Autodiff<NdArray>>(&HalvesSource, DatasetKind::Mnist, Default::default())
            .unwrap();

        let report = outcome.report;
        assert_eq!(report.total, 8);
        assert_eq!(report.correct.len(), 8);
        assert!((0.0..=100.0).contains(&report.accuracy));
        let right = report.correct.iter().filter(|&&c| c).count();
        assert_eq!(report.accuracy, 100.0 * right as f64 / 8.0);

        assert_eq!(outcome.top_k.len(), 2);
        assert_eq!(outcome.top_k[1], (2, 100.0));
    }

    #[test]
    fn test_checkpoint_with_saved_config() {
        let dir     = tempfile::tempdir().unwrap();
        let device  = Default::default();
        let net_cfg = NetworkConfig::for_architecture(Architecture::Mlp, 1, 4, 4, 7);
        let manager = CheckpointManager::new(dir.path()).unwrap();
        manager.save_config(&net_cfg, NETWORK_CONFIG_FILE).unwrap();
        let net: Network<NdArray> = net_cfg.init(&device);
        let path = manager.save_final(&net, 0).unwrap();

        // --model is ignored in favour of the saved architecture
        let cfg = LinearEvalConfig { checkpoint: Some(path), top_k: Vec::new(), ..config() };
        let outcome = LinearEvalUseCase::new(cfg)
            .run::<Autodiff<NdArray>>(&HalvesSource, DatasetKind::Mnist, device)
            .unwrap();
        assert_eq!(outcome.report.total, 8);
        assert!(outcome.top_k.is_empty());
    }
}
