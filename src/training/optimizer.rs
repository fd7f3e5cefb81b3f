//! Adam over one variable store, with persistable moments
//!
//! Moments are kept per named parameter so they can be written next to a
//! parameter snapshot and restored on resume.

use std::collections::HashMap;
use std::path::Path;

use tch::{nn::VarStore, Tensor};

use crate::error::{GanClsError, Result};

const STEP_KEY: &str = "step";
const EXP_AVG_PREFIX: &str = "exp_avg.";
const EXP_AVG_SQ_PREFIX: &str = "exp_avg_sq.";

/// Adam optimizer
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    t: i64,
    /// Trainable parameters sorted by name
    params: Vec<(String, Tensor)>,
    exp_avg: Vec<Tensor>,
    exp_avg_sq: Vec<Tensor>,
}

impl Adam {
    /// Optimizer over every trainable variable of `vs`
    pub fn new(vs: &VarStore, learning_rate: f64, beta1: f64) -> Self {
        let mut params: Vec<(String, Tensor)> = vs
            .variables()
            .into_iter()
            .filter(|(_, t)| t.requires_grad())
            .collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));

        let (exp_avg, exp_avg_sq) = tch::no_grad(|| {
            (
                params.iter().map(|(_, t)| t.zeros_like()).collect(),
                params.iter().map(|(_, t)| t.zeros_like()).collect(),
            )
        });

        Self {
            learning_rate,
            beta1,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            params,
            exp_avg,
            exp_avg_sq,
        }
    }

    /// Updates applied so far
    pub fn num_updates(&self) -> i64 {
        self.t
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn zero_grad(&mut self) {
        for (_, param) in self.params.iter_mut() {
            param.zero_grad();
        }
    }

    /// Apply one update from the accumulated gradients
    ///
    /// Parameters without a gradient are left untouched.
    pub fn step(&mut self) {
        self.t += 1;
        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.epsilon);
        let bias1 = 1.0 - beta1.powi(self.t as i32);
        let bias2 = 1.0 - beta2.powi(self.t as i32);
        let step_size = self.learning_rate / bias1;

        let moments = self.exp_avg.iter_mut().zip(self.exp_avg_sq.iter_mut());
        tch::no_grad(|| {
            for ((_, param), (m, v)) in self.params.iter_mut().zip(moments) {
                let grad = param.grad();
                if !grad.defined() {
                    continue;
                }

                let next_m = &*m * beta1 + &grad * (1.0 - beta1);
                m.copy_(&next_m);
                let next_v = &*v * beta2 + (&grad * &grad) * (1.0 - beta2);
                v.copy_(&next_v);

                let denom = v.sqrt() / bias2.sqrt() + eps;
                let updated = &*param - (&*m / denom) * step_size;
                param.copy_(&updated);
            }
        });
    }

    /// Write the step count and both moments to one `.ot` file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let step = Tensor::from_slice(&[self.t]);
        let mut named: Vec<(String, &Tensor)> = vec![(STEP_KEY.to_string(), &step)];
        for ((name, _), (m, v)) in self.params.iter().zip(self.exp_avg.iter().zip(&self.exp_avg_sq)) {
            named.push((format!("{EXP_AVG_PREFIX}{name}"), m));
            named.push((format!("{EXP_AVG_SQ_PREFIX}{name}"), v));
        }
        Tensor::save_multi(&named, path)?;
        Ok(())
    }

    /// Restore state written by `save` for the same parameter set
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut saved: HashMap<String, Tensor> = Tensor::load_multi(path)?.into_iter().collect();
        let missing = |key: &str| {
            GanClsError::Config(format!("{} has no entry {}", path.display(), key))
        };

        let step = saved.remove(STEP_KEY).ok_or_else(|| missing(STEP_KEY))?;
        let t = step.int64_value(&[0]);

        let mut restored = Vec::with_capacity(self.params.len());
        for (name, param) in &self.params {
            let mut pair = Vec::with_capacity(2);
            for prefix in [EXP_AVG_PREFIX, EXP_AVG_SQ_PREFIX] {
                let key = format!("{prefix}{name}");
                let src = saved.remove(&key).ok_or_else(|| missing(&key))?;
                if src.size() != param.size() {
                    return Err(GanClsError::shape(key, param.size(), src.size()));
                }
                pair.push(src);
            }
            restored.push(pair);
        }

        tch::no_grad(|| {
            for ((m, v), pair) in self.exp_avg.iter_mut().zip(self.exp_avg_sq.iter_mut()).zip(&restored) {
                m.copy_(&pair[0]);
                v.copy_(&pair[1]);
            }
        });
        self.t = t;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn, Device};

    fn single_weight(value: f64) -> (VarStore, Tensor) {
        let vs = VarStore::new(Device::Cpu);
        let w = vs.root().var("w", &[3], nn::Init::Const(value));
        (vs, w)
    }

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let (vs, w) = single_weight(1.0);
        let mut opt = Adam::new(&vs, 0.1, 0.5);
        assert_eq!(opt.num_params(), 1);

        opt.zero_grad();
        (&w * 3.0).sum(tch::Kind::Float).backward();
        opt.step();

        assert_eq!(opt.num_updates(), 1);
        let expected = Tensor::from_slice(&[0.9f32, 0.9, 0.9]);
        assert!(w.allclose(&expected, 1e-5, 1e-6, false));
    }

    #[test]
    fn test_parameters_without_gradient_are_skipped() {
        let vs = VarStore::new(Device::Cpu);
        let used = vs.root().var("used", &[2], nn::Init::Const(1.0));
        let idle = vs.root().var("idle", &[2], nn::Init::Const(1.0));
        let mut opt = Adam::new(&vs, 0.1, 0.5);

        opt.zero_grad();
        used.sum(tch::Kind::Float).backward();
        opt.step();

        assert!(idle.equal(&Tensor::ones([2], (tch::Kind::Float, Device::Cpu))));
        assert!(!used.equal(&Tensor::ones([2], (tch::Kind::Float, Device::Cpu))));
    }

    #[test]
    fn test_saved_moments_continue_the_same_trajectory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opt.ot");

        let (vs_a, w_a) = single_weight(1.0);
        let mut a = Adam::new(&vs_a, 0.1, 0.5);
        for _ in 0..2 {
            a.zero_grad();
            (&w_a * &w_a).sum(tch::Kind::Float).backward();
            a.step();
        }
        a.save(&path).unwrap();

        let (vs_b, w_b) = single_weight(1.0);
        tch::no_grad(|| w_b.shallow_clone().copy_(&w_a));
        let mut b = Adam::new(&vs_b, 0.1, 0.5);
        b.load(&path).unwrap();
        assert_eq!(b.num_updates(), 2);

        for (w, opt) in [(&w_a, &mut a), (&w_b, &mut b)] {
            opt.zero_grad();
            (w * w).sum(tch::Kind::Float).backward();
            opt.step();
        }
        assert!(w_a.allclose(&w_b, 1e-6, 1e-7, false));
    }

    #[test]
    fn test_load_rejects_other_parameter_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opt.ot");
        let (vs, _w) = single_weight(1.0);
        Adam::new(&vs, 0.1, 0.5).save(&path).unwrap();

        let other = VarStore::new(Device::Cpu);
        let _v = other.root().var("v", &[3], nn::Init::Const(0.0));
        assert!(Adam::new(&other, 0.1, 0.5).load(&path).is_err());
    }
}
