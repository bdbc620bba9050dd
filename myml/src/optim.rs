//! Optimizers.

use ndarray::prelude::*;
use ndarray::Zip;

use crate::Optimizer;

/// Plain stochastic gradient descent: `p -= rate * dp`.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f32,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> Self {
        Sgd { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn update(&mut self, mut params: ArrayViewMut1<'_, f32>, grads: ArrayView1<'_, f32>) {
        params.scaled_add(-self.learning_rate, &grads);
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

/// Learning-rate schedule for [`Adam`]: `max(lr_min, lr / (1 + gamma * t))`
/// where `t` counts updates already applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anneal {
    pub lr_min: f32,
    pub gamma: f32,
}

/// Adam (Kingma & Ba), optionally with an annealed step size.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    anneal: Option<Anneal>,
    /// Number of updates applied so far.
    t: u64,
    m: Array1<f32>,
    v: Array1<f32>,
}

impl Adam {
    pub fn new(num_params: usize, learning_rate: f32) -> Self {
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            anneal: None,
            t: 0,
            m: Array1::zeros(num_params),
            v: Array1::zeros(num_params),
        }
    }

    pub fn with_anneal(mut self, anneal: Anneal) -> Self {
        self.anneal = Some(anneal);
        self
    }

    pub fn steps(&self) -> u64 {
        self.t
    }
}

impl Optimizer for Adam {
    fn update(&mut self, mut params: ArrayViewMut1<'_, f32>, grads: ArrayView1<'_, f32>) {
        assert_eq!(params.len(), self.m.len());
        assert_eq!(grads.len(), self.m.len());

        let lr = self.learning_rate();
        self.t += 1;
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let bias1 = 1.0 - beta1.powi(self.t.min(i32::MAX as u64) as i32);
        let bias2 = 1.0 - beta2.powi(self.t.min(i32::MAX as u64) as i32);

        Zip::from(&mut params)
            .and(&grads)
            .and(&mut self.m)
            .and(&mut self.v)
            .for_each(|p, &g, m, v| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= lr * m_hat / (v_hat.sqrt() + epsilon);
            });
    }

    fn learning_rate(&self) -> f32 {
        match self.anneal {
            None => self.learning_rate,
            Some(Anneal { lr_min, gamma }) => {
                (self.learning_rate / (1.0 + gamma * self.t as f32)).max(lr_min)
            }
        }
    }
}
