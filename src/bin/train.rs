// src/bin/train.rs

use anyhow::{Result, bail};
use chrono::Utc;
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use std::{f64::consts::PI, fs, path::PathBuf, time::Instant};
use tch::{Device, Kind, Tensor, nn, nn::OptimizerConfig};
use topicvae::{
    DialogueModel, ModelConfig,
    checkpoint::{self, Checkpoint},
    data::{self, Dialogue, DialogueCorpus},
    loss::ElboTerms,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
/// Trains the dialogue model on a corpus built by `process_data`.
struct TrainArgs {
    /// Corpus file written by `process_data`
    corpus: String,

    /// Directory receiving `config.json` and checkpoints
    #[arg(long, short)]
    out_dir: PathBuf,

    /// Model configuration (JSON); defaults are used when absent
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Resume from this checkpoint
    #[arg(long)]
    resume: Option<PathBuf>,

    #[arg(long, default_value_t = 20)]
    epochs: i64,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, default_value_t = 1e-4)]
    learning_rate: f64,

    /// Gradient clipping norm
    #[arg(long, default_value_t = 1.0)]
    clip_grad_norm: f64,

    /// Steps over which the KL weight rises linearly from 0 to 1
    #[arg(long, default_value_t = 10000)]
    kl_anneal_steps: i64,

    #[arg(long, default_value_t = 1.0)]
    mixture_weight: f64,

    /// Log every this many optimizer steps
    #[arg(long, default_value_t = 100)]
    log_every: i64,

    /// Train on the first CUDA device if available
    #[arg(long)]
    cuda: bool,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

fn kl_weight(global_step: i64, anneal_steps: i64) -> f64 {
    if anneal_steps <= 0 {
        return 1.0;
    }
    (global_step as f64 / anneal_steps as f64).min(1.0)
}

fn main() -> Result<()> {
    let args = TrainArgs::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(if args.verbose { "debug" } else { "info" })).init();

    let device = if args.cuda { Device::cuda_if_available() } else { Device::Cpu };
    if args.batch_size == 0 {
        bail!("batch size must be positive");
    }

    // --- 1. Setup ---
    let config = match &args.config {
        Some(path) => ModelConfig::from_json_file(path)?,
        None => {
            warn!("no model configuration given, using defaults");
            ModelConfig::default()
        }
    };
    fs::create_dir_all(&args.out_dir)?;
    config.to_json_file(args.out_dir.join("config.json"))?;

    let corpus = DialogueCorpus::load(&args.corpus)?;
    if corpus.dialogues.is_empty() {
        bail!("corpus {} holds no dialogues", args.corpus);
    }
    let pool = corpus.reference_pool(config.pad_id, device)?;
    info!(
        "loaded {} dialogues and {} reference sentences on {device:?}",
        corpus.dialogues.len(),
        corpus.reference_sentences.len()
    );

    // --- 2. Build the Model ---
    let mut vs = nn::VarStore::new(device);
    let model = DialogueModel::new(&vs, &config)?;
    let (start_epoch, mut global_step) = match &args.resume {
        Some(path) => {
            let restored = checkpoint::load(&mut vs, path)?;
            (restored.epoch + 1, restored.global_step)
        }
        None => (1, 0),
    };
    let mut optimizer = nn::Adam::default().build(&vs, args.learning_rate)?;

    // --- 3. Training Loop ---
    let steps_per_epoch = corpus.dialogues.len().div_ceil(args.batch_size) as i64;
    let total_steps = (args.epochs * steps_per_epoch).max(1);
    for epoch in start_epoch..=args.epochs {
        let epoch_start_time = Instant::now();
        let order = Vec::<i64>::try_from(Tensor::randperm(corpus.dialogues.len() as i64, (Kind::Int64, Device::Cpu)))?;
        let mut totals = [0.0f64; 3];
        let mut batches = 0;
        let mut last_posterior = None;

        for chunk in order.chunks(args.batch_size) {
            let dialogues: Vec<Dialogue> = chunk.iter().map(|&i| corpus.dialogues[i as usize].clone()).collect();
            let batch = data::collate(&dialogues, config.pad_id, config.latent_size, device)?;
            let output = model.forward_t(&batch, &pool, true)?;
            let terms = ElboTerms::new(
                &output,
                &batch.responses,
                kl_weight(global_step, args.kl_anneal_steps),
                args.mixture_weight,
            )?;

            optimizer.zero_grad();
            terms.total.backward();
            optimizer.clip_grad_norm(args.clip_grad_norm);
            optimizer.step();
            global_step += 1;

            let lr = args.learning_rate * (1.0 + (PI * global_step as f64 / total_steps as f64).cos()) / 2.0;
            optimizer.set_lr(lr);

            let nll = terms.nll.double_value(&[]);
            let kl = terms.kl.double_value(&[]);
            let mixture = terms.mixture.double_value(&[]);
            if !(nll + kl + mixture).is_finite() {
                bail!("loss diverged at step {global_step}: nll {nll}, kl {kl}, mixture {mixture}");
            }
            totals[0] += nll;
            totals[1] += kl;
            totals[2] += mixture;
            batches += 1;
            if global_step % args.log_every == 0 {
                info!("step {global_step}: nll {nll:.4} | kl {kl:.4} | mixture {mixture:.4} | lr {lr:.6}");
            }
            last_posterior = Some(output.posterior);
        }

        let n = batches.max(1) as f64;
        info!(
            "epoch {epoch:<3} | nll {:.4} | kl {:.4} | mixture {:.4} | {:?}",
            totals[0] / n,
            totals[1] / n,
            totals[2] / n,
            epoch_start_time.elapsed()
        );

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = args.out_dir.join(format!("model_epoch{epoch}_{stamp}.ot"));
        checkpoint::save(&vs, &path, &Checkpoint { epoch, global_step, posterior: last_posterior })?;
    }

    info!("training complete after {global_step} steps");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kl_weight_anneals_linearly() {
        assert_eq!(kl_weight(0, 100), 0.0);
        assert_eq!(kl_weight(50, 100), 0.5);
        assert_eq!(kl_weight(500, 100), 1.0);
        assert_eq!(kl_weight(3, 0), 1.0);
    }
}
