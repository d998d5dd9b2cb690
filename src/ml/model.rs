use std::str::FromStr;

use anyhow::{bail, Result};
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AvgPool2d, AvgPool2dConfig},
        GroupNorm, GroupNormConfig,
        Linear, LinearConfig,
        PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::relu,
};

use crate::domain::traits::FeatureExtractor;

/// Width of the MLP hidden layers.
const MLP_HIDDEN: usize = 128;

/// Network architectures understood by `--model`.
///
/// `ConvNet` is depth 3, width 128, instance norm. `ConvNetD{n}` changes
/// the depth, `ConvNetW{n}` the width and `ConvNetNN` drops the norm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Mlp,
    ConvNet { depth: usize, width: usize, norm: bool },
}

impl FromStr for Architecture {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let conv = |depth, width, norm| Architecture::ConvNet { depth, width, norm };
        Ok(match s {
            "MLP"        => Architecture::Mlp,
            "ConvNet"    => conv(3, 128, true),
            "ConvNetD1"  => conv(1, 128, true),
            "ConvNetD2"  => conv(2, 128, true),
            "ConvNetD3"  => conv(3, 128, true),
            "ConvNetD4"  => conv(4, 128, true),
            "ConvNetD5"  => conv(5, 128, true),
            "ConvNetW32" => conv(3, 32, true),
            "ConvNetW64" => conv(3, 64, true),
            "ConvNetW128" => conv(3, 128, true),
            "ConvNetW256" => conv(3, 256, true),
            "ConvNetNN"  => conv(3, 128, false),
            other => bail!("unknown model '{}'", other),
        })
    }
}

#[derive(Config, Debug)]
pub struct NetworkConfig {
    pub channels:    usize,
    pub height:      usize,
    pub width:       usize,
    pub num_outputs: usize,
    /// Number of conv blocks; 0 builds the MLP.
    #[config(default = 3)]
    pub depth:       usize,
    #[config(default = 128)]
    pub net_width:   usize,
    #[config(default = true)]
    pub norm:        bool,
}

impl NetworkConfig {
    pub fn for_architecture(
        arch:        Architecture,
        channels:    usize,
        height:      usize,
        width:       usize,
        num_outputs: usize,
    ) -> Self {
        let cfg = NetworkConfig::new(channels, height, width, num_outputs);
        match arch {
            Architecture::Mlp => cfg.with_depth(0).with_net_width(MLP_HIDDEN).with_norm(false),
            Architecture::ConvNet { depth, width, norm } => {
                cfg.with_depth(depth).with_net_width(width).with_norm(norm)
            }
        }
    }

    /// Spatial size after the conv stack; pooling stops below 2x2.
    fn feature_shape(&self) -> (usize, usize) {
        let (mut h, mut w) = (self.height, self.width);
        for _ in 0..self.depth {
            if h >= 2 && w >= 2 {
                h /= 2;
                w /= 2;
            }
        }
        (h, w)
    }

    /// Length of the vector produced by `Network::features`.
    pub fn feature_dim(&self) -> usize {
        if self.depth == 0 {
            return MLP_HIDDEN;
        }
        let (h, w) = self.feature_shape();
        self.net_width * h * w
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Network<B> {
        let blocks = (0..self.depth)
            .map(|i| {
                let in_channels = if i == 0 { self.channels } else { self.net_width };
                let conv = Conv2dConfig::new([in_channels, self.net_width], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device);
                let norm = self
                    .norm
                    .then(|| GroupNormConfig::new(self.net_width, self.net_width).init(device));
                ConvBlock { conv, norm }
            })
            .collect();

        let hidden = if self.depth == 0 {
            let input = self.channels * self.height * self.width;
            vec![
                LinearConfig::new(input, MLP_HIDDEN).init(device),
                LinearConfig::new(MLP_HIDDEN, MLP_HIDDEN).init(device),
            ]
        } else {
            Vec::new()
        };

        let classifier = LinearConfig::new(self.feature_dim(), self.num_outputs).init(device);
        let pool = AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Network { blocks, hidden, classifier, pool }
    }
}

/// conv 3x3 → (instance norm) → relu; pooling is applied by the network.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: Option<GroupNorm<B>>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None       => x,
        };
        relu(x)
    }
}

#[derive(Module, Debug)]
pub struct Network<B: Backend> {
    pub blocks:     Vec<ConvBlock<B>>,
    pub hidden:     Vec<Linear<B>>,
    pub classifier: Linear<B>,
    pub pool:       AvgPool2d,
}

impl<B: Backend> Network<B> {
    /// images: [batch, c, h, w] → features: [batch, feature_dim]
    pub fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
            let [_, _, h, w] = x.dims();
            if h >= 2 && w >= 2 {
                x = self.pool.forward(x);
            }
        }
        let mut x: Tensor<B, 2> = x.flatten(1, 3);
        for layer in &self.hidden {
            x = relu(layer.forward(x));
        }
        x
    }

    /// features: [batch, feature_dim] → outputs: [batch, num_outputs]
    pub fn classify(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        self.classifier.forward(features)
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.classify(self.features(images))
    }
}

impl<B: Backend> FeatureExtractor<B> for Network<B> {
    fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        Network::features(self, images)
    }
}
