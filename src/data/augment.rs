// ============================================================
// Layer 4 — Image Augmentation
// ============================================================
// Host-side augmentation applied by the batcher while training.
// A strategy is a `_`-separated list of operations, e.g.
//
//   color_crop_cutout_flip_scale_rotate   (Siamese augmentation default)
//   crop_scale_rotate                     (whole-dataset training)
//
// One operation is drawn uniformly from the list and applied with
// freshly sampled parameters. The draw happens per image, or once
// per batch for Siamese augmentation (every image in the batch gets
// the same operation, each with its own parameters).
//
//   color   → brightness, saturation and contrast jitter
//   crop    → random translation, zero padded
//   cutout  → zero a random square
//   flip    → horizontal flip with probability 1/2
//   scale   → independent x/y scaling
//   rotate  → rotation about the centre
//
// Geometric operations use nearest-neighbour sampling.
//
// Reference: Zhao & Bilen (2021) Dataset Condensation with
//            Differentiable Siamese Augmentation

use std::str::FromStr;

use anyhow::{bail, Result};
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugOp {
    Color,
    Crop,
    Cutout,
    Flip,
    Scale,
    Rotate,
}

impl FromStr for AugOp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "color"  => AugOp::Color,
            "crop"   => AugOp::Crop,
            "cutout" => AugOp::Cutout,
            "flip"   => AugOp::Flip,
            "scale"  => AugOp::Scale,
            "rotate" => AugOp::Rotate,
            other    => bail!("unknown augmentation '{}'", other),
        })
    }
}

/// Magnitudes of the augmentation operations.
#[derive(Debug, Clone)]
pub struct AugParams {
    pub scale:      f32,
    pub rotate_deg: f32,
    pub crop:       f32,
    pub cutout:     f32,
    pub brightness: f32,
    pub saturation: f32,
    pub contrast:   f32,
}

impl Default for AugParams {
    fn default() -> Self {
        Self {
            scale:      1.2,
            rotate_deg: 15.0,
            crop:       0.125,
            cutout:     0.5,
            brightness: 1.0,
            saturation: 2.0,
            contrast:   0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Augmentation {
    ops:       Vec<AugOp>,
    params:    AugParams,
    per_batch: bool,
}

impl Augmentation {
    /// Parse a strategy string such as `crop_scale_rotate`.
    pub fn from_strategy(strategy: &str) -> Result<Self> {
        let ops = strategy
            .split('_')
            .filter(|s| !s.is_empty())
            .map(AugOp::from_str)
            .collect::<Result<Vec<_>>>()?;
        if ops.is_empty() {
            bail!("augmentation strategy '{}' names no operations", strategy);
        }
        Ok(Self { ops, params: AugParams::default(), per_batch: false })
    }

    /// Draw one operation for the whole batch instead of per image.
    pub fn one_op_per_batch(mut self) -> Self {
        self.per_batch = true;
        self
    }

    pub fn per_batch(&self) -> bool {
        self.per_batch
    }

    pub fn draw<R: Rng>(&self, rng: &mut R) -> AugOp {
        self.ops[rng.gen_range(0..self.ops.len())]
    }

    /// Augment one CHW image in place with a freshly drawn operation.
    pub fn apply<R: Rng>(&self, image: &mut [f32], c: usize, h: usize, w: usize, rng: &mut R) {
        let op = self.draw(rng);
        self.apply_op(op, image, c, h, w, rng);
    }

    pub fn apply_op<R: Rng>(
        &self,
        op:    AugOp,
        image: &mut [f32],
        c:     usize,
        h:     usize,
        w:     usize,
        rng:   &mut R,
    ) {
        let p = &self.params;
        match op {
            AugOp::Color => {
                color_jitter(image, c, h * w, p, rng);
            }
            AugOp::Crop => {
                let max_dy = (h as f32 * p.crop).round() as i64;
                let max_dx = (w as f32 * p.crop).round() as i64;
                let dy = rng.gen_range(-max_dy..=max_dy);
                let dx = rng.gen_range(-max_dx..=max_dx);
                resample(image, c, h, w, |y, x| (y - dy as f32, x - dx as f32));
            }
            AugOp::Cutout => {
                let ch = ((h as f32 * p.cutout) as usize).max(1);
                let cw = ((w as f32 * p.cutout) as usize).max(1);
                let cy = rng.gen_range(0..h) as i64 - (ch / 2) as i64;
                let cx = rng.gen_range(0..w) as i64 - (cw / 2) as i64;
                for plane in image.chunks_mut(h * w) {
                    for y in cy.max(0)..(cy + ch as i64).min(h as i64) {
                        for x in cx.max(0)..(cx + cw as i64).min(w as i64) {
                            plane[y as usize * w + x as usize] = 0.0;
                        }
                    }
                }
            }
            AugOp::Flip => {
                if rng.gen_bool(0.5) {
                    for row in image.chunks_mut(w) {
                        row.reverse();
                    }
                }
            }
            AugOp::Scale => {
                let sy = rng.gen_range(1.0 / p.scale..=p.scale);
                let sx = rng.gen_range(1.0 / p.scale..=p.scale);
                let (cy, cx) = centre(h, w);
                resample(image, c, h, w, |y, x| (cy + (y - cy) / sy, cx + (x - cx) / sx));
            }
            AugOp::Rotate => {
                let theta = rng.gen_range(-p.rotate_deg..=p.rotate_deg).to_radians();
                let (sin, cos) = theta.sin_cos();
                let (cy, cx) = centre(h, w);
                resample(image, c, h, w, |y, x| {
                    let (dy, dx) = (y - cy, x - cx);
                    (cy + cos * dy - sin * dx, cx + sin * dy + cos * dx)
                });
            }
        }
    }
}

fn centre(h: usize, w: usize) -> (f32, f32) {
    ((h as f32 - 1.0) / 2.0, (w as f32 - 1.0) / 2.0)
}

/// Rebuild every plane by sampling `source(y, x)`; zero outside the image.
fn resample<F>(image: &mut [f32], c: usize, h: usize, w: usize, source: F)
where
    F: Fn(f32, f32) -> (f32, f32),
{
    let plane = h * w;
    let mut out = vec![0.0f32; c * plane];
    for y in 0..h {
        for x in 0..w {
            let (sy, sx) = source(y as f32, x as f32);
            let (sy, sx) = (sy.round(), sx.round());
            if sy < 0.0 || sx < 0.0 || sy >= h as f32 || sx >= w as f32 {
                continue;
            }
            let src = sy as usize * w + sx as usize;
            for ch in 0..c {
                out[ch * plane + y * w + x] = image[ch * plane + src];
            }
        }
    }
    image.copy_from_slice(&out);
}

fn color_jitter<R: Rng>(image: &mut [f32], c: usize, plane: usize, p: &AugParams, rng: &mut R) {
    // brightness
    let shift = (rng.gen::<f32>() - 0.5) * p.brightness;
    image.iter_mut().for_each(|v| *v += shift);

    // saturation: scale each pixel's deviation from its channel mean
    let factor = rng.gen::<f32>() * p.saturation;
    for i in 0..plane {
        let mean = (0..c).map(|ch| image[ch * plane + i]).sum::<f32>() / c as f32;
        for ch in 0..c {
            let v = &mut image[ch * plane + i];
            *v = (*v - mean) * factor + mean;
        }
    }

    // contrast
    let factor = rng.gen::<f32>() + p.contrast;
    let mean = image.iter().sum::<f32>() / image.len().max(1) as f32;
    image.iter_mut().for_each(|v| *v = (*v - mean) * factor + mean);
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn ramp(c: usize, h: usize, w: usize) -> Vec<f32> {
        (0..c * h * w).map(|v| v as f32 + 1.0).collect()
    }

    #[test]
    fn test_parse_strategy() {
        let aug = Augmentation::from_strategy("crop_scale_rotate").unwrap();
        assert_eq!(aug.ops, [AugOp::Crop, AugOp::Scale, AugOp::Rotate]);
        assert!(Augmentation::from_strategy("crop_blur").is_err());
        assert!(Augmentation::from_strategy("").is_err());
    }

    #[test]
    fn test_flip_is_mirror_or_identity() {
        let aug = Augmentation::from_strategy("flip").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let original = ramp(1, 2, 3);
        let mirrored = vec![3.0, 2.0, 1.0, 6.0, 5.0, 4.0];
        for _ in 0..8 {
            let mut img = original.clone();
            aug.apply(&mut img, 1, 2, 3, &mut rng);
            assert!(img == original || img == mirrored);
        }
    }

    #[test]
    fn test_cutout_zeroes_a_region() {
        let aug = Augmentation::from_strategy("cutout").unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut img = ramp(2, 8, 8);
        aug.apply(&mut img, 2, 8, 8, &mut rng);
        let zeros = img.iter().filter(|&&v| v == 0.0).count();
        assert!(zeros > 0);
        // the same region is cut from every channel
        assert_eq!(zeros % 2, 0);
    }

    #[test]
    fn test_geometric_ops_keep_length() {
        let mut rng = StdRng::seed_from_u64(5);
        for op in [AugOp::Crop, AugOp::Scale, AugOp::Rotate, AugOp::Color] {
            let aug = Augmentation::from_strategy("crop").unwrap();
            let mut img = ramp(3, 6, 6);
            aug.apply_op(op, &mut img, 3, 6, 6, &mut rng);
            assert_eq!(img.len(), 3 * 36);
            assert!(img.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_zero_rotation_is_identity() {
        let params = AugParams { rotate_deg: 0.0, ..AugParams::default() };
        let aug = Augmentation { ops: vec![AugOp::Rotate], params, per_batch: false };
        let mut rng = StdRng::seed_from_u64(9);
        let mut img = ramp(1, 5, 5);
        aug.apply(&mut img, 1, 5, 5, &mut rng);
        assert_eq!(img, ramp(1, 5, 5));
    }
}
