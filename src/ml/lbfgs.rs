// ============================================================
// Layer 5 — L-BFGS
// ============================================================
// Limited-memory BFGS over a flat f32 parameter vector. The
// objective is a closure returning (loss, gradient), so the same
// optimiser drives any model whose parameters can be flattened.
//
// One call to `step` performs up to `max_iter` iterations:
//
//   d = -H·g        (two-loop recursion over the (s, y) history)
//   t = Armijo backtracking from lr (first ever iteration scales
//       by min(1, 1/|g|₁))
//   θ ← θ + t·d
//   store (s = t·d, y = g' - g) when the curvature y·s is positive
//
// The history persists between calls, so repeated `step` calls
// continue one optimisation run.

use std::collections::VecDeque;

use anyhow::{bail, Result};

const ARMIJO_C1:        f64   = 1e-4;
const MAX_BACKTRACKS:   usize = 30;
const MIN_CURVATURE:    f64   = 1e-10;

#[derive(Debug, Clone)]
pub struct LbfgsConfig {
    pub lr:           f64,
    pub max_iter:     usize,
    pub max_eval:     usize,
    pub tol_grad:     f64,
    pub tol_change:   f64,
    pub history_size: usize,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            lr:           1.0,
            max_iter:     20,
            max_eval:     25,
            tol_grad:     1e-7,
            tol_change:   1e-9,
            history_size: 100,
        }
    }
}

pub struct Lbfgs {
    config: LbfgsConfig,
    s_hist: VecDeque<Vec<f32>>,
    y_hist: VecDeque<Vec<f32>>,
    h_diag: f64,
    n_iter: usize,
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum()
}

fn max_abs(v: &[f32]) -> f64 {
    v.iter().fold(0.0f64, |m, &x| m.max((x as f64).abs()))
}

impl Lbfgs {
    pub fn new(config: LbfgsConfig) -> Self {
        Self {
            config,
            s_hist: VecDeque::new(),
            y_hist: VecDeque::new(),
            h_diag: 1.0,
            n_iter: 0,
        }
    }

    /// d = -H·g using the stored curvature pairs.
    fn direction(&self, grad: &[f32]) -> Vec<f32> {
        let mut q: Vec<f64> = grad.iter().map(|&g| -(g as f64)).collect();
        let k = self.s_hist.len();
        let mut alpha = vec![0.0f64; k];
        let rho: Vec<f64> = (0..k)
            .map(|i| 1.0 / dot(&self.y_hist[i], &self.s_hist[i]))
            .collect();

        for i in (0..k).rev() {
            let s = &self.s_hist[i];
            alpha[i] = rho[i] * s.iter().zip(&q).map(|(&a, &b)| a as f64 * b).sum::<f64>();
            for (qj, &yj) in q.iter_mut().zip(&self.y_hist[i]) {
                *qj -= alpha[i] * yj as f64;
            }
        }

        for qj in q.iter_mut() {
            *qj *= self.h_diag;
        }

        for i in 0..k {
            let y    = &self.y_hist[i];
            let beta = rho[i] * y.iter().zip(&q).map(|(&a, &b)| a as f64 * b).sum::<f64>();
            for (qj, &sj) in q.iter_mut().zip(&self.s_hist[i]) {
                *qj += (alpha[i] - beta) * sj as f64;
            }
        }

        q.into_iter().map(|v| v as f32).collect()
    }

    fn remember(&mut self, s: Vec<f32>, y: Vec<f32>) {
        let ys = dot(&y, &s);
        if ys <= MIN_CURVATURE {
            return;
        }
        if self.s_hist.len() == self.config.history_size {
            self.s_hist.pop_front();
            self.y_hist.pop_front();
        }
        self.h_diag = ys / dot(&y, &y);
        self.s_hist.push_back(s);
        self.y_hist.push_back(y);
    }

    /// Run up to `max_iter` iterations on `params` in place and return
    /// the loss at the final parameters.
    pub fn step<F>(&mut self, params: &mut [f32], objective: &mut F) -> Result<f64>
    where
        F: FnMut(&[f32]) -> Result<(f64, Vec<f32>)>,
    {
        let cfg = self.config.clone();

        let (mut loss, mut grad) = objective(params)?;
        let mut evals = 1;
        if grad.len() != params.len() {
            bail!("gradient has {} entries for {} parameters", grad.len(), params.len());
        }
        if !loss.is_finite() {
            bail!("objective is not finite at the starting point ({})", loss);
        }
        if max_abs(&grad) <= cfg.tol_grad {
            return Ok(loss);
        }

        for _ in 0..cfg.max_iter {
            self.n_iter += 1;

            // ── Search direction ──────────────────────────────────────────────
            let d   = self.direction(&grad);
            let gtd = dot(&grad, &d);
            if gtd > -cfg.tol_change {
                break;
            }

            let mut t = if self.n_iter == 1 {
                let g_l1: f64 = grad.iter().map(|&g| (g as f64).abs()).sum();
                (1.0f64).min(1.0 / g_l1) * cfg.lr
            } else {
                cfg.lr
            };

            // ── Backtracking line search ──────────────────────────────────────
            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let trial: Vec<f32> = params
                    .iter()
                    .zip(&d)
                    .map(|(&p, &dj)| p + (t * dj as f64) as f32)
                    .collect();
                let (f_new, g_new) = objective(&trial)?;
                evals += 1;
                if f_new.is_finite() && f_new <= loss + ARMIJO_C1 * t * gtd {
                    accepted = Some((trial, f_new, g_new));
                    break;
                }
                if evals >= cfg.max_eval {
                    break;
                }
                t *= 0.5;
            }
            let Some((trial, f_new, g_new)) = accepted else {
                tracing::debug!("L-BFGS line search found no decrease; stopping");
                break;
            };

            // ── Update history and parameters ─────────────────────────────────
            let s: Vec<f32> = d.iter().map(|&dj| (t * dj as f64) as f32).collect();
            let y: Vec<f32> = g_new.iter().zip(&grad).map(|(&a, &b)| a - b).collect();
            let step_size   = max_abs(&s);
            self.remember(s, y);

            params.copy_from_slice(&trial);
            let prev_loss = loss;
            loss = f_new;
            grad = g_new;

            // ── Convergence checks ────────────────────────────────────────────
            if evals >= cfg.max_eval
                || max_abs(&grad) <= cfg.tol_grad
                || step_size <= cfg.tol_change
                || (loss - prev_loss).abs() < cfg.tol_change
            {
                break;
            }
        }

        Ok(loss)
    }
}
