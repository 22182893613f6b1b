// src/checkpoint.rs

//! Saving and restoring training state.
//!
//! A checkpoint is a single libtorch archive holding every `VarStore`
//! variable under its path (`post_encoder.weight_ih_l0`, `mixture.pi`, ...),
//! the `meta.epoch` and `meta.global_step` counters and, if the caller kept
//! them, the last posterior statistics.

use crate::error::{Error, Result};
use crate::latent::GaussianParams;
use log::info;
use std::collections::HashMap;
use std::path::Path;
use tch::{nn::VarStore, Tensor};

const EPOCH: &str = "meta.epoch";
const GLOBAL_STEP: &str = "meta.global_step";
const POSTERIOR_MU: &str = "posterior.mu";
const POSTERIOR_LOGVAR: &str = "posterior.logvar";

#[derive(Debug)]
pub struct Checkpoint {
    pub epoch: i64,
    pub global_step: i64,
    pub posterior: Option<GaussianParams>,
}

fn component(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

pub fn save<P: AsRef<Path>>(vs: &VarStore, path: P, checkpoint: &Checkpoint) -> Result<()> {
    let mut named: Vec<(String, Tensor)> = vs.variables().into_iter().collect();
    named.push((EPOCH.to_string(), Tensor::from_slice(&[checkpoint.epoch])));
    named.push((GLOBAL_STEP.to_string(), Tensor::from_slice(&[checkpoint.global_step])));
    if let Some(posterior) = &checkpoint.posterior {
        named.push((POSTERIOR_MU.to_string(), posterior.mu.detach()));
        named.push((POSTERIOR_LOGVAR.to_string(), posterior.logvar.detach()));
    }
    Tensor::save_multi(&named, path.as_ref())?;
    info!(
        "saved checkpoint at epoch {} (step {}) to {:?}",
        checkpoint.epoch,
        checkpoint.global_step,
        path.as_ref()
    );
    Ok(())
}

/// Copies the stored values into `vs` in place. Every variable of `vs` must
/// be present with the same shape.
pub fn load<P: AsRef<Path>>(vs: &mut VarStore, path: P) -> Result<Checkpoint> {
    let mut stored: HashMap<String, Tensor> = Tensor::load_multi(path.as_ref())?.into_iter().collect();

    let scalar = |stored: &HashMap<String, Tensor>, name: &str| -> Result<i64> {
        let value = stored.get(name).ok_or_else(|| Error::MissingComponent(component(name).to_string()))?;
        Ok(value.f_int64_value(&[0])?)
    };
    let epoch = scalar(&stored, EPOCH)?;
    let global_step = scalar(&stored, GLOBAL_STEP)?;

    let device = vs.device();
    let mut variables: Vec<(String, Tensor)> = vs.variables().into_iter().collect();
    variables.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, var) in &variables {
        let source = stored.get(name).ok_or_else(|| Error::MissingComponent(component(name).to_string()))?;
        if source.size() != var.size() {
            return Err(Error::IncompatibleComponent {
                component: component(name).to_string(),
                reason: format!("`{name}` has shape {:?}, expected {:?}", source.size(), var.size()),
            });
        }
    }
    tch::no_grad(|| -> Result<()> {
        for (name, var) in &mut variables {
            if let Some(source) = stored.get(name.as_str()) {
                var.f_copy_(&source.to_device(device))?;
            }
        }
        Ok(())
    })?;

    let posterior = match (stored.remove(POSTERIOR_MU), stored.remove(POSTERIOR_LOGVAR)) {
        (Some(mu), Some(logvar)) => Some(GaussianParams { mu: mu.to_device(device), logvar: logvar.to_device(device) }),
        _ => None,
    };
    info!("restored {} variables at epoch {epoch} (step {global_step})", variables.len());
    Ok(Checkpoint { epoch, global_step, posterior })
}
