// src/mixture.rs

//! Gaussian-mixture prior over the latent space (VaDE-style clustering).
//!
//! The mixture parameters are ordinary `VarStore` variables: forward passes
//! only read them, the optimizer updates them between calls, and
//! [`GaussianMixture::assign`] is the one place that overwrites them directly.

use crate::error::{shape, Result};
use crate::latent::GaussianParams;
use std::f64::consts::PI;
use tch::{nn, nn::Path, Kind, Tensor};

/// Added to every unnormalised responsibility before row normalisation.
pub const RESPONSIBILITY_FLOOR: f64 = 1e-10;

#[derive(Debug)]
pub struct GaussianMixture {
    pi: Tensor,
    mu_c: Tensor,
    log_sigma2_c: Tensor,
    n_clusters: i64,
    latent_size: i64,
}

impl GaussianMixture {
    /// Uniform weights, zero means, unit variances.
    pub fn new(p: &Path, n_clusters: i64, latent_size: i64) -> Self {
        let pi = p.var("pi", &[n_clusters], nn::Init::Const(1.0 / n_clusters as f64));
        let mu_c = p.zeros("mu_c", &[n_clusters, latent_size]);
        let log_sigma2_c = p.zeros("log_sigma2_c", &[n_clusters, latent_size]);
        Self { pi, mu_c, log_sigma2_c, n_clusters, latent_size }
    }

    pub fn n_clusters(&self) -> i64 {
        self.n_clusters
    }

    pub fn weights(&self) -> &Tensor {
        &self.pi
    }

    pub fn means(&self) -> &Tensor {
        &self.mu_c
    }

    pub fn log_variances(&self) -> &Tensor {
        &self.log_sigma2_c
    }

    /// Log-density of each row of `z` under each component, `[batch, K]`.
    pub fn log_pdfs(&self, z: &Tensor) -> Tensor {
        let log_sigma2 = self.log_sigma2_c.unsqueeze(0);
        let sq = (z.unsqueeze(1) - self.mu_c.unsqueeze(0)).square() / log_sigma2.exp();
        (sq + &log_sigma2 + (2.0 * PI).ln()).sum_dim_intlist(2, false, Kind::Float) * -0.5
    }

    fn joint(&self, z: &Tensor) -> Tensor {
        (self.pi.log().unsqueeze(0) + self.log_pdfs(z)).exp()
    }

    fn check_latent(&self, z: &Tensor) -> Result<()> {
        match z.size().as_slice() {
            [_, d] if *d == self.latent_size => Ok(()),
            other => Err(shape(format!("latent batch {other:?} is not [batch, {}]", self.latent_size))),
        }
    }

    /// Soft cluster assignments of `z`; rows sum to one.
    pub fn responsibilities(&self, z: &Tensor) -> Result<Tensor> {
        self.check_latent(z)?;
        let yita = self.joint(z) + RESPONSIBILITY_FLOOR;
        let total = yita.sum_dim_intlist(1, true, Kind::Float);
        Ok(yita / total)
    }

    /// Hard assignment of each row of `z`, `[batch]` (i64).
    pub fn predict(&self, z: &Tensor) -> Result<Tensor> {
        self.check_latent(z)?;
        Ok(self.joint(z).argmax(1, false))
    }

    /// Expected KL between the posterior and the mixture under `yita`, less
    /// the assignment entropy term and the posterior's own entropy term.
    pub fn loss(&self, posterior: &GaussianParams, yita: &Tensor) -> Tensor {
        let log_sigma2 = self.log_sigma2_c.unsqueeze(0);
        let logvar = posterior.logvar.unsqueeze(1);
        let mu = posterior.mu.unsqueeze(1);

        let component = &log_sigma2
            + (logvar - &log_sigma2).exp()
            + (mu - self.mu_c.unsqueeze(0)).square() / log_sigma2.exp();
        let expected = (yita * component.sum_dim_intlist(2, false, Kind::Float))
            .sum_dim_intlist(1, false, Kind::Float)
            .mean(Kind::Float)
            * 0.5;

        let entropy = (yita * (self.pi.unsqueeze(0) / yita).log())
            .sum_dim_intlist(1, false, Kind::Float)
            .mean(Kind::Float);
        let posterior_term = (&posterior.logvar + 1.0)
            .sum_dim_intlist(1, false, Kind::Float)
            .mean(Kind::Float)
            * 0.5;

        expected - (entropy + posterior_term)
    }

    /// Overwrites the mixture, e.g. with a GMM fitted to posterior means.
    pub fn assign(&mut self, pi: &Tensor, mu_c: &Tensor, log_sigma2_c: &Tensor) -> Result<()> {
        let expected = [
            ("pi", pi, vec![self.n_clusters]),
            ("mu_c", mu_c, vec![self.n_clusters, self.latent_size]),
            ("log_sigma2_c", log_sigma2_c, vec![self.n_clusters, self.latent_size]),
        ];
        for (name, tensor, dims) in &expected {
            if &tensor.size() != dims {
                return Err(shape(format!("{name} {:?} should be {dims:?}", tensor.size())));
            }
        }
        tch::no_grad(|| -> Result<()> {
            self.pi.f_copy_(pi)?;
            self.mu_c.f_copy_(mu_c)?;
            self.log_sigma2_c.f_copy_(log_sigma2_c)?;
            Ok(())
        })
    }
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device};

    fn mixture(vs: &VarStore) -> GaussianMixture {
        let mut gmm = GaussianMixture::new(&(vs.root() / "mixture"), 4, 3);
        let means = Tensor::from_slice(&[-3.0f32, -3.0, -3.0, 0.0, 0.0, 0.0, 3.0, 3.0, 3.0, 6.0, 0.0, -6.0]).view([4, 3]);
        let log_vars = Tensor::randn([4, 3], (Kind::Float, Device::Cpu)) * 0.1;
        let weights = Tensor::from_slice(&[0.1f32, 0.2, 0.3, 0.4]);
        gmm.assign(&weights, &means, &log_vars).unwrap();
        gmm
    }

    #[test]
    fn responsibilities_are_row_distributions() {
        tch::manual_seed(1);
        let vs = VarStore::new(Device::Cpu);
        let gmm = mixture(&vs);
        let z = Tensor::randn([16, 3], (Kind::Float, Device::Cpu)) * 4.0;
        let yita = gmm.responsibilities(&z).unwrap();
        assert_eq!(yita.size(), [16, 4]);
        assert!(yita.min().double_value(&[]) >= 0.0);
        let rows = yita.sum_dim_intlist(1, false, Kind::Float);
        assert!(rows.allclose(&Tensor::ones([16], (Kind::Float, Device::Cpu)), 1e-5, 1e-5, false));
    }

    #[test]
    fn far_away_latents_still_normalise() {
        let vs = VarStore::new(Device::Cpu);
        let gmm = GaussianMixture::new(&vs.root(), 3, 2);
        // every joint density underflows; the floor keeps rows well defined
        let z = Tensor::full([2, 2], 1e4, (Kind::Float, Device::Cpu));
        let yita = gmm.responsibilities(&z).unwrap();
        let uniform = Tensor::full([2, 3], 1.0 / 3.0, (Kind::Float, Device::Cpu));
        assert!(yita.allclose(&uniform, 1e-5, 1e-6, false));
    }

    #[test]
    fn predict_picks_the_nearest_component() {
        let vs = VarStore::new(Device::Cpu);
        let gmm = mixture(&vs);
        let z = Tensor::from_slice(&[-3.1f32, -2.9, -3.0, 6.0, 0.2, -5.9, 0.1, 0.0, -0.1]).view([3, 3]);
        let clusters = Vec::<i64>::try_from(&gmm.predict(&z).unwrap()).unwrap();
        assert_eq!(clusters, vec![0, 3, 1]);
    }

    #[test]
    fn loss_is_finite_and_matches_the_closed_form() {
        let vs = VarStore::new(Device::Cpu);
        let gmm = GaussianMixture::new(&vs.root(), 2, 1);
        let posterior = GaussianParams {
            mu: Tensor::from_slice(&[1.0f32]).view([1, 1]),
            logvar: Tensor::from_slice(&[0.0f32]).view([1, 1]),
        };
        let yita = Tensor::from_slice(&[0.5f32, 0.5]).view([1, 2]);
        // components are N(0, 1), pi = 0.5: 0.5 * (0 + 1 + 1) - (0 + 0.5 * 1)
        let loss = gmm.loss(&posterior, &yita).double_value(&[]);
        assert!((loss - 0.5).abs() < 1e-6);
    }

    #[test]
    fn assign_checks_shapes() {
        let vs = VarStore::new(Device::Cpu);
        let mut gmm = GaussianMixture::new(&vs.root(), 4, 3);
        let bad = Tensor::zeros([3, 3], (Kind::Float, Device::Cpu));
        let pi = Tensor::full([4], 0.25, (Kind::Float, Device::Cpu));
        assert!(gmm.assign(&pi, &bad, &bad).is_err());
    }
}
