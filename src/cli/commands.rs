// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the three subcommands, `buffer`, `linear-eval` and
// `inspect`, with all their configurable flags.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::application::{
    buffer_use_case::BufferConfig,
    linear_eval_use_case::LinearEvalConfig,
};
use crate::ml::loss::Criterion;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train expert networks and save their trajectories
    Buffer(BufferArgs),

    /// Fit a linear probe on a backbone's features and report accuracy
    LinearEval(LinearEvalArgs),

    /// Summarise a saved buffer file
    Inspect(InspectArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum CriterionArg {
    /// Mean squared error
    Mse,
    /// Cross-entropy
    Ce,
}

impl From<CriterionArg> for Criterion {
    fn from(c: CriterionArg) -> Self {
        match c {
            CriterionArg::Mse => Criterion::Mse,
            CriterionArg::Ce  => Criterion::CrossEntropy,
        }
    }
}

/// All arguments for the `buffer` command.
#[derive(Args, Debug)]
pub struct BufferArgs {
    /// MNIST, FashionMNIST, CIFAR10 or CIFAR100
    #[arg(long, default_value = "CIFAR100")]
    pub dataset: String,

    /// JSON list of class ids to keep
    #[arg(long)]
    pub subset: Option<PathBuf>,

    /// MLP, ConvNet, ConvNetD{1..5}, ConvNetW{32,64,128,256}, ConvNetNN
    #[arg(long, default_value = "ConvNet")]
    pub model: String,

    /// Number of teacher networks to train
    #[arg(long, default_value_t = 100)]
    pub num_experts: usize,

    /// Learning rate for updating network parameters
    #[arg(long, default_value_t = 0.1)]
    pub lr_teacher: f64,

    /// Batch size for training networks
    #[arg(long, default_value_t = 256)]
    pub batch_train: usize,

    /// Batch size for the real (test) loader
    #[arg(long, default_value_t = 256)]
    pub batch_real: usize,

    /// Use the differentiable Siamese augmentation strategy
    #[arg(long)]
    pub dsa: bool,

    #[arg(long, default_value = "color_crop_cutout_flip_scale_rotate")]
    pub dsa_strategy: String,

    /// Augment training images
    #[arg(long)]
    pub enable_aug: bool,

    #[arg(long, default_value = "data")]
    pub data_path: PathBuf,

    #[arg(long, default_value = "./buffers_simclr_rep")]
    pub buffer_path: PathBuf,

    #[arg(long, default_value_t = 20)]
    pub train_epochs: usize,

    /// ZCA-whiten CIFAR images instead of normalising them
    #[arg(long)]
    pub zca: bool,

    /// Drop the learning rate x0.1 halfway through training
    #[arg(long)]
    pub decay: bool,

    /// Momentum
    #[arg(long, default_value_t = 0.9)]
    pub mom: f64,

    /// L2 regularization
    #[arg(long, default_value_t = 1e-4)]
    pub l2: f64,

    /// Experts per buffer file
    #[arg(long, default_value_t = 1)]
    pub save_interval: usize,

    #[arg(long)]
    pub run_id: Option<String>,

    /// Precomputed training targets (class indices or dense rows)
    #[arg(long)]
    pub train_labels_path: Option<PathBuf>,

    #[arg(long)]
    pub test_labels_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = CriterionArg::Mse)]
    pub criterion: CriterionArg,

    /// GPU number
    #[arg(long, default_value_t = 0)]
    pub device: usize,

    /// JSON list of training indices to distill on
    #[arg(long)]
    pub distill_idx: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Also report the test loss after every epoch
    #[arg(long)]
    pub eval_test: bool,

    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,
}

impl From<BufferArgs> for BufferConfig {
    fn from(a: BufferArgs) -> Self {
        BufferConfig {
            dataset:           a.dataset,
            subset:            a.subset,
            model:             a.model,
            num_experts:       a.num_experts,
            lr_teacher:        a.lr_teacher,
            batch_train:       a.batch_train,
            batch_real:        a.batch_real,
            dsa:               a.dsa,
            dsa_strategy:      a.dsa_strategy,
            enable_aug:        a.enable_aug,
            data_path:         a.data_path,
            buffer_path:       a.buffer_path,
            train_epochs:      a.train_epochs,
            zca:               a.zca,
            decay:             a.decay,
            mom:               a.mom,
            l2:                a.l2,
            save_interval:     a.save_interval,
            run_id:            a.run_id,
            train_labels_path: a.train_labels_path,
            test_labels_path:  a.test_labels_path,
            criterion:         a.criterion.into(),
            device:            a.device,
            distill_idx:       a.distill_idx,
            seed:              a.seed,
            eval_test:         a.eval_test,
            num_workers:       a.num_workers,
        }
    }
}

/// All arguments for the `linear-eval` command.
#[derive(Args, Debug)]
pub struct LinearEvalArgs {
    #[arg(long, default_value = "CIFAR100")]
    pub dataset: String,

    #[arg(long, default_value = "data")]
    pub data_path: PathBuf,

    /// Used when no network_config.json sits next to the checkpoint
    #[arg(long, default_value = "ConvNet")]
    pub model: String,

    /// Backbone weights, e.g. full_buffer_0.mpk
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    #[arg(long, default_value_t = 256)]
    pub batch_size: usize,

    /// L-BFGS steps
    #[arg(long, default_value_t = 20)]
    pub le_iters: usize,

    /// L2 regularization weight on the classifier
    #[arg(long, default_value_t = 1e-3)]
    pub reg_weight: f64,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[arg(long)]
    pub zca: bool,

    #[arg(long)]
    pub subset: Option<PathBuf>,

    /// Fit the probe on these training indices only
    #[arg(long)]
    pub distill_idx: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    pub device: usize,

    /// Also report top-k accuracy, e.g. --top-k 1,5
    #[arg(long, value_delimiter = ',')]
    pub top_k: Vec<usize>,
}

impl From<LinearEvalArgs> for LinearEvalConfig {
    fn from(a: LinearEvalArgs) -> Self {
        LinearEvalConfig {
            dataset:     a.dataset,
            data_path:   a.data_path,
            model:       a.model,
            checkpoint:  a.checkpoint,
            batch_size:  a.batch_size,
            le_iters:    a.le_iters,
            reg_weight:  a.reg_weight,
            seed:        a.seed,
            zca:         a.zca,
            subset:      a.subset,
            distill_idx: a.distill_idx,
            device:      a.device,
            top_k:       a.top_k,
        }
    }
}

/// All arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Path to a replay_buffer_{n}.bin file
    #[arg(long)]
    pub buffer: PathBuf,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_buffer_defaults() {
        let cli = Cli::try_parse_from(["trajectory-buffers", "buffer"]).unwrap();
        let Commands::Buffer(args) = cli.command else { panic!("expected buffer") };
        let cfg: BufferConfig = args.into();
        assert_eq!(cfg.dataset, "CIFAR100");
        assert_eq!(cfg.num_experts, 100);
        assert_eq!(cfg.criterion, Criterion::Mse);
        assert_eq!(cfg.save_interval, 1);
        assert!(cfg.run_id.is_none());
    }

    #[test]
    fn test_buffer_flags() {
        let cli = Cli::try_parse_from([
            "trajectory-buffers", "buffer",
            "--dataset", "CIFAR10", "--model", "ConvNetD4", "--criterion", "ce",
            "--zca", "--run-id", "7", "--distill-idx", "idx.json", "--lr-teacher", "0.01",
        ])
        .unwrap();
        let Commands::Buffer(args) = cli.command else { panic!("expected buffer") };
        let cfg: BufferConfig = args.into();
        assert_eq!(cfg.criterion, Criterion::CrossEntropy);
        assert!(cfg.zca);
        assert_eq!(cfg.run_id.as_deref(), Some("7"));
        assert_eq!(cfg.distill_idx, Some(PathBuf::from("idx.json")));
        assert_eq!(cfg.lr_teacher, 0.01);
    }

    #[test]
    fn test_linear_eval_top_k_list() {
        let cli = Cli::try_parse_from(["trajectory-buffers", "linear-eval", "--top-k", "1,5"]).unwrap();
        let Commands::LinearEval(args) = cli.command else { panic!("expected linear-eval") };
        let cfg: LinearEvalConfig = args.into();
        assert_eq!(cfg.top_k, vec![1, 5]);
        assert_eq!(cfg.le_iters, 20);
    }

    #[test]
    fn test_unknown_criterion_is_rejected() {
        assert!(Cli::try_parse_from(["trajectory-buffers", "buffer", "--criterion", "l1"]).is_err());
    }
}
