// ============================================================
// Layer 2 — BufferUseCase
// ============================================================
// Generates expert trajectories:
//
//   Step 1: Prepare the dataset              (Layer 4 - data)
//   Step 2: Load training / test targets     (Layer 4 - data)
//   Step 3: Build the data loaders           (Layer 4 - data)
//   Step 4: Save the run configuration       (Layer 6 - infra)
//   Step 5: For every expert:
//             train, checkpoint, buffer      (Layers 5 and 6)
//
// Output layout:
//   {buffer_path}/{dataset}[_NO_ZCA][_{run_id}]/{model}/
//     replay_buffer_{n}.bin, full_buffer_{i}.mpk,
//     original_buffer_model_{i}_{e}.mpk, metrics.csv,
//     buffer_config.json, network_config.json

use anyhow::{bail, Result};
use burn::{prelude::*, tensor::backend::AutodiffBackend};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::application::dataset_prep::{build_loader, prepare_splits};
use crate::data::{
    augment::Augmentation,
    batcher::ImageBatcher,
    dataset::ImageDataset,
    labels::{load_indices, load_targets},
    loader::{DatasetKind, DatasetLoader},
};
use crate::domain::{image_split::ImageSplit, targets::Targets, traits::DatasetSource};
use crate::infra::{
    buffer_store::BufferStore,
    checkpoint::CheckpointManager,
    metrics::MetricsLogger,
};
use crate::ml::{
    backend::{select_device, TrainBackend},
    loss::Criterion,
    model::{Architecture, NetworkConfig},
    trainer::{train_expert, TeacherParams},
};

/// Strategy used when augmentation is on but DSA is not.
const WHOLE_DATASET_STRATEGY: &str = "crop_scale_rotate";

// ─── Buffer Configuration ─────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    pub dataset:           String,
    pub subset:            Option<PathBuf>,
    pub model:             String,
    pub num_experts:       usize,
    pub lr_teacher:        f64,
    pub batch_train:       usize,
    pub batch_real:        usize,
    pub dsa:               bool,
    pub dsa_strategy:      String,
    pub enable_aug:        bool,
    pub data_path:         PathBuf,
    pub buffer_path:       PathBuf,
    pub train_epochs:      usize,
    pub zca:               bool,
    pub decay:             bool,
    pub mom:               f64,
    pub l2:                f64,
    pub save_interval:     usize,
    pub run_id:            Option<String>,
    pub train_labels_path: Option<PathBuf>,
    pub test_labels_path:  Option<PathBuf>,
    pub criterion:         Criterion,
    pub device:            usize,
    pub distill_idx:       Option<PathBuf>,
    pub seed:              u64,
    pub eval_test:         bool,
    pub num_workers:       usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            dataset:           "CIFAR100".to_string(),
            subset:            None,
            model:             "ConvNet".to_string(),
            num_experts:       100,
            lr_teacher:        0.1,
            batch_train:       256,
            batch_real:        256,
            dsa:               false,
            dsa_strategy:      "color_crop_cutout_flip_scale_rotate".to_string(),
            enable_aug:        false,
            data_path:         PathBuf::from("data"),
            buffer_path:       PathBuf::from("./buffers_simclr_rep"),
            train_epochs:      20,
            zca:               false,
            decay:             false,
            mom:               0.9,
            l2:                1e-4,
            save_interval:     1,
            run_id:            None,
            train_labels_path: None,
            test_labels_path:  None,
            criterion:         Criterion::Mse,
            device:            0,
            distill_idx:       None,
            seed:              0,
            eval_test:         false,
            num_workers:       4,
        }
    }
}

impl BufferConfig {
    /// `{buffer_path}/{dataset}[_NO_ZCA][_{run_id}]/{model}`
    pub fn save_dir(&self, kind: DatasetKind) -> PathBuf {
        let mut name = self.dataset.clone();
        if kind.supports_zca() && !self.zca {
            name.push_str("_NO_ZCA");
        }
        if let Some(id) = &self.run_id {
            name.push('_');
            name.push_str(id);
        }
        self.buffer_path.join(name).join(&self.model)
    }

    fn augmentation(&self) -> Result<Option<Augmentation>> {
        if !self.enable_aug {
            return Ok(None);
        }
        let strategy = if self.dsa { self.dsa_strategy.as_str() } else { WHOLE_DATASET_STRATEGY };
        tracing::info!("Augmentation strategy: {}", strategy);
        let aug = Augmentation::from_strategy(strategy)?;
        Ok(Some(if self.dsa { aug.one_op_per_batch() } else { aug }))
    }

    fn teacher_params(&self) -> TeacherParams {
        TeacherParams {
            epochs:       self.train_epochs,
            lr:           self.lr_teacher,
            momentum:     self.mom,
            weight_decay: self.l2,
            decay:        self.decay,
            criterion:    self.criterion,
        }
    }
}

/// What a finished run wrote.
#[derive(Debug, Clone)]
pub struct BufferSummary {
    pub save_dir:     PathBuf,
    pub buffer_files: Vec<PathBuf>,
    pub experts:      usize,
}

// ─── BufferUseCase ────────────────────────────────────────────────────────────
pub struct BufferUseCase {
    config: BufferConfig,
}

impl BufferUseCase {
    pub fn new(config: BufferConfig) -> Self {
        Self { config }
    }

    /// Load the configured dataset from disk and run on the process backend.
    pub fn execute(&self) -> Result<BufferSummary> {
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
    ) -> Result<BufferSummary> {
        let cfg = &self.config;
        if cfg.save_interval == 0 {
            bail!("save interval must be at least 1");
        }
        B::seed(cfg.seed);
        tracing::info!("Hyper-parameters: {}", serde_json::to_string(cfg)?);

        // ── Step 1: Dataset ───────────────────────────────────────────────────
        let data = prepare_splits::<B::InnerBackend>(
            source, kind, cfg.zca, cfg.subset.as_deref(), &device,
        )?;

        // ── Step 2: Targets ───────────────────────────────────────────────────
        let train_targets = resolve_targets(
            cfg.train_labels_path.as_ref(), &data.train, data.info.num_classes, cfg.criterion, "train",
        )?;
        let test_targets = resolve_targets(
            cfg.test_labels_path.as_ref(), &data.test, data.info.num_classes, cfg.criterion, "test",
        )?;
        tracing::info!("train label shape [{}, {}]", train_targets.len(), train_targets.output_dim());
        tracing::info!("test label shape [{}, {}]", test_targets.len(), test_targets.output_dim());
        if train_targets.output_dim() != test_targets.output_dim() {
            bail!(
                "train targets have width {} but test targets have width {}",
                train_targets.output_dim(), test_targets.output_dim()
            );
        }
        let num_outputs = train_targets.output_dim();

        // ── Step 3: Loaders ───────────────────────────────────────────────────
        let (c, h, w) = (data.info.channels, data.info.height, data.info.width);
        let distill   = cfg.distill_idx.as_deref().map(load_indices).transpose()?;
        if let Some(indices) = &distill {
            tracing::info!("Training on {} distilled examples", indices.len());
        }

        let train_batcher = ImageBatcher::<B>::new(device.clone(), c, h, w)
            .with_augmentation(cfg.augmentation()?);
        let train_loader = build_loader(
            ImageDataset::new(data.train, train_targets)?,
            distill,
            train_batcher,
            cfg.batch_train,
            Some(cfg.seed),
            cfg.num_workers,
        )?;

        let test_loader = if cfg.eval_test {
            let batcher = ImageBatcher::<B::InnerBackend>::new(device.clone(), c, h, w);
            Some(build_loader(
                ImageDataset::new(data.test, test_targets)?,
                None,
                batcher,
                cfg.batch_real,
                None,
                cfg.num_workers,
            )?)
        } else {
            None
        };

        // ── Step 4: Output directory and configs ──────────────────────────────
        let arch     = cfg.model.parse::<Architecture>()?;
        let net_cfg  = NetworkConfig::for_architecture(arch, c, h, w, num_outputs);
        let save_dir = cfg.save_dir(kind);

        let checkpoints = CheckpointManager::new(&save_dir)?;
        checkpoints.save_config(cfg, "buffer_config.json")?;
        checkpoints.save_config(&net_cfg, "network_config.json")?;
        let metrics    = MetricsLogger::new(&save_dir)?;
        let mut store  = BufferStore::new(&save_dir)?;
        let mut files  = Vec::new();

        let params = cfg.teacher_params();
        if let Some(epoch) = params.decay_epoch() {
            tracing::info!("Learning rate decays x0.1 at epoch {}", epoch);
        }
        tracing::info!("Saving to '{}'", save_dir.display());

        // ── Step 5: Experts ───────────────────────────────────────────────────
        for expert in 0..cfg.num_experts {
            let run = train_expert::<B, _>(
                &net_cfg,
                &params,
                &train_loader,
                test_loader.as_ref(),
                &device,
                |model, stats| {
                    match stats.test_loss {
                        Some(test_loss) => tracing::info!(
                            "Itr: {} \tEpoch: {} \tTrain Loss: {:.6} \tTest Loss: {:.6}",
                            expert, stats.epoch, stats.train_loss, test_loss
                        ),
                        None => tracing::info!(
                            "Itr: {} \tEpoch: {} \tTrain Loss: {:.6}",
                            expert, stats.epoch, stats.train_loss
                        ),
                    }
                    checkpoints.save_epoch(model, expert, stats.epoch + 1)?;
                    metrics.log(expert, stats)
                },
            )?;

            if expert == 0 {
                tracing::info!("Network {} with {} parameters", cfg.model, run.model.num_params());
            }
            checkpoints.save_final(&run.model, expert)?;
            store.push(run.trajectory);

            if (expert + 1) % cfg.save_interval == 0 {
                files.extend(store.flush()?);
            }
        }
        files.extend(store.flush()?);

        Ok(BufferSummary { save_dir, buffer_files: files, experts: cfg.num_experts })
    }
}

/// Targets of `split`: from the label file when given, otherwise the
/// split's own class labels. MSE always trains on dense rows.
fn resolve_targets(
    path:        Option<&PathBuf>,
    split:       &ImageSplit,
    num_classes: usize,
    criterion:   Criterion,
    name:        &str,
) -> Result<Targets> {
    let targets = match path {
        Some(path) => match load_targets(path)? {
            Targets::Classes { labels, num_classes: seen } => {
                Targets::classes(labels, seen.max(num_classes))?
            }
            dense => dense,
        },
        None => Targets::classes(split.labels.clone(), num_classes)?,
    };
    targets.ensure_len(split.len(), name)?;

    Ok(if criterion.needs_dense_targets() { targets.to_dense() } else { targets })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use std::fs;

    use crate::data::labels::save_targets;
    use crate::domain::image_split::DatasetInfo;
    use crate::domain::trajectory::HostTensor;

    struct SyntheticSource;

    impl DatasetSource for SyntheticSource {
        fn load(&self) -> Result<(DatasetInfo, ImageSplit, ImageSplit)> {
            let split = |n: usize| {
                let images = (0..n * 16).map(|i| ((i * 13) % 17) as f32 / 17.0).collect();
                let labels = (0..n).map(|i| i % 10).collect();
                ImageSplit::new(1, 4, 4, images, labels)
            };
            let info = DatasetInfo {
                name: "MNIST".into(), channels: 1, height: 4, width: 4, num_classes: 10,
            };
            Ok((info, split(12)?, split(6)?))
        }
    }

    fn config(buffer_path: PathBuf) -> BufferConfig {
        BufferConfig {
            dataset:       "MNIST".into(),
            model:         "MLP".into(),
            num_experts:   3,
            lr_teacher:    0.01,
            batch_train:   4,
            batch_real:    4,
            buffer_path,
            train_epochs:  2,
            save_interval: 2,
            run_id:        Some("test".into()),
            criterion:     Criterion::CrossEntropy,
            num_workers:   0,
            ..Default::default()
        }
    }

    #[test]
    fn test_save_dir_naming() {
        let cfg = BufferConfig { buffer_path: "buf".into(), run_id: Some("7".into()), ..Default::default() };
        assert_eq!(cfg.save_dir(DatasetKind::Cifar100), PathBuf::from("buf/CIFAR100_NO_ZCA_7/ConvNet"));

        let cfg = BufferConfig { dataset: "MNIST".into(), buffer_path: "buf".into(), ..Default::default() };
        assert_eq!(cfg.save_dir(DatasetKind::Mnist), PathBuf::from("buf/MNIST/ConvNet"));
    }

    #[test]
    fn test_dsa_draws_one_op_per_batch() {
        let cfg = BufferConfig { enable_aug: true, dsa: true, ..Default::default() };
        assert!(cfg.augmentation().unwrap().unwrap().per_batch());

        let cfg = BufferConfig { enable_aug: true, dsa: false, ..Default::default() };
        assert!(!cfg.augmentation().unwrap().unwrap().per_batch());

        let cfg = BufferConfig { enable_aug: false, ..Default::default() };
        assert!(cfg.augmentation().unwrap().is_none());
    }

    #[test]
    fn test_run_writes_buffers_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path().to_path_buf());

        let summary = BufferUseCase::new(cfg)
            .run::<Autodiff<NdArray>>(&SyntheticSource, DatasetKind::Mnist, Default::default())
            .unwrap();

        let save_dir = dir.path().join("MNIST_test").join("MLP");
        assert_eq!(summary.save_dir, save_dir);
        // two experts in the first flush, the remainder in the second
        assert_eq!(summary.buffer_files, vec![
            save_dir.join("replay_buffer_0.bin"),
            save_dir.join("replay_buffer_1.bin"),
        ]);
        let first  = BufferStore::load(&summary.buffer_files[0]).unwrap();
        let second = BufferStore::load(&summary.buffer_files[1]).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(first.iter().chain(&second).all(|t| t.len() == 3));

        for expert in 0..3 {
            assert!(save_dir.join(format!("full_buffer_{expert}.mpk")).exists());
            assert!(save_dir.join(format!("original_buffer_model_{expert}_2.mpk")).exists());
        }
        let csv = fs::read_to_string(save_dir.join("metrics.csv")).unwrap();
        assert_eq!(csv.lines().count(), 1 + 3 * 2);
        assert!(save_dir.join("network_config.json").exists());
    }

    #[test]
    fn test_second_run_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BufferConfig { num_experts: 1, save_interval: 1, ..config(dir.path().to_path_buf()) };

        let first = BufferUseCase::new(cfg.clone())
            .run::<Autodiff<NdArray>>(&SyntheticSource, DatasetKind::Mnist, Default::default())
            .unwrap();
        let second = BufferUseCase::new(cfg)
            .run::<Autodiff<NdArray>>(&SyntheticSource, DatasetKind::Mnist, Default::default())
            .unwrap();

        assert!(first.buffer_files[0].ends_with("replay_buffer_0.bin"));
        assert!(second.buffer_files[0].ends_with("replay_buffer_1.bin"));
    }

    #[test]
    fn test_dense_label_file_sets_output_width() {
        let dir    = tempfile::tempdir().unwrap();
        let labels = dir.path().join("train_rep.bin");
        let tests  = dir.path().join("test_rep.bin");
        save_targets(&labels, &HostTensor::new(vec![12, 5], vec![0.25; 60]).unwrap()).unwrap();
        save_targets(&tests, &HostTensor::new(vec![6, 5], vec![0.25; 30]).unwrap()).unwrap();

        let cfg = BufferConfig {
            num_experts:       1,
            train_epochs:      1,
            criterion:         Criterion::Mse,
            train_labels_path: Some(labels),
            test_labels_path:  Some(tests),
            eval_test:         true,
            ..config(dir.path().join("out"))
        };
        let summary = BufferUseCase::new(cfg)
            .run::<Autodiff<NdArray>>(&SyntheticSource, DatasetKind::Mnist, Default::default())
            .unwrap();

        let net_cfg: NetworkConfig =
            CheckpointManager::load_config(&summary.save_dir.join("network_config.json")).unwrap();
        assert_eq!(net_cfg.num_outputs, 5);
    }

    #[test]
    fn test_label_file_length_must_match_split() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.bin");
        save_targets(&path, &HostTensor::new(vec![3], vec![0.0, 1.0, 2.0]).unwrap()).unwrap();

        let split = ImageSplit::new(1, 1, 1, vec![0.0; 4], vec![0; 4]).unwrap();
        assert!(resolve_targets(Some(&path), &split, 10, Criterion::CrossEntropy, "train").is_err());
    }

    #[test]
    fn test_mse_gets_one_hot_targets() {
        let split   = ImageSplit::new(1, 1, 1, vec![0.0; 2], vec![1, 0]).unwrap();
        let targets = resolve_targets(None, &split, 3, Criterion::Mse, "train").unwrap();
        assert_eq!(targets, Targets::Dense { values: vec![0.0, 1.0, 0.0, 1.0, 0.0, 0.0], dim: 3 });
    }
}
