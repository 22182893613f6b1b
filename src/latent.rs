// src/latent.rs

//! Diagonal-Gaussian latent distributions and the networks that produce them.

use crate::error::{shape, Result};
use tch::{nn, nn::Path, Kind, Tensor};

/// Mean and log-variance of a diagonal Gaussian, each `[batch, latent]`.
#[derive(Debug)]
pub struct GaussianParams {
    pub mu: Tensor,
    pub logvar: Tensor,
}

impl GaussianParams {
    /// Reparameterised sample `mu + exp(0.5 * logvar) * eps`.
    pub fn sample(&self, eps: &Tensor) -> Result<Tensor> {
        if eps.size() != self.mu.size() {
            return Err(shape(format!(
                "latent noise {:?} does not match latent parameters {:?}",
                eps.size(),
                self.mu.size()
            )));
        }
        Ok(&self.mu + (&self.logvar * 0.5).exp() * eps)
    }

    /// `KL(self || other)` per example, `[batch]`.
    pub fn kl_divergence(&self, other: &GaussianParams) -> Tensor {
        let ratio = (&self.logvar - &other.logvar).exp();
        let distance = (&self.mu - &other.mu).square() / other.logvar.exp();
        ((&other.logvar - &self.logvar) + ratio + distance - 1.0).sum_dim_intlist(1, false, Kind::Float) * 0.5
    }

    pub fn shallow_clone(&self) -> Self {
        Self { mu: self.mu.shallow_clone(), logvar: self.logvar.shallow_clone() }
    }
}

/// Feed-forward map from concatenated condition vectors to a Gaussian.
/// Log-variance is left unconstrained.
#[derive(Debug)]
pub struct GaussianNet {
    hidden: Vec<nn::Linear>,
    mu: nn::Linear,
    logvar: nn::Linear,
}

impl GaussianNet {
    pub fn new(p: &Path, input_size: i64, hidden_dims: &[i64], latent_size: i64) -> Self {
        let mut hidden = Vec::with_capacity(hidden_dims.len());
        let mut in_dim = input_size;
        for (i, &dim) in hidden_dims.iter().enumerate() {
            hidden.push(nn::linear(p / format!("hidden{i}"), in_dim, dim, Default::default()));
            in_dim = dim;
        }
        let mu = nn::linear(p / "mu", in_dim, latent_size, Default::default());
        let logvar = nn::linear(p / "logvar", in_dim, latent_size, Default::default());
        Self { hidden, mu, logvar }
    }

    pub fn forward(&self, conditions: &[&Tensor]) -> GaussianParams {
        let mut xs = Tensor::cat(conditions, 1);
        for layer in &self.hidden {
            xs = xs.apply(layer).tanh();
        }
        GaussianParams { mu: xs.apply(&self.mu), logvar: xs.apply(&self.logvar) }
    }
}

/// Prior `p(z | x, t)` and approximate posterior `q(z | x, y, t)`.
#[derive(Debug)]
pub struct PosteriorPriorNetwork {
    prior: GaussianNet,
    posterior: GaussianNet,
}

impl PosteriorPriorNetwork {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prior_path: &Path,
        posterior_path: &Path,
        post_size: i64,
        response_size: i64,
        topic_size: i64,
        latent_size: i64,
        dims_prior: &[i64],
        dims_recognize: &[i64],
    ) -> Self {
        Self {
            prior: GaussianNet::new(prior_path, post_size + topic_size, dims_prior, latent_size),
            posterior: GaussianNet::new(posterior_path, post_size + response_size + topic_size, dims_recognize, latent_size),
        }
    }

    pub fn prior(&self, x: &Tensor, t: &Tensor) -> GaussianParams {
        self.prior.forward(&[x, t])
    }

    pub fn posterior(&self, x: &Tensor, y: &Tensor, t: &Tensor) -> GaussianParams {
        self.posterior.forward(&[x, y, t])
    }
}
