// src/loss.rs

//! Training objective: masked reconstruction NLL, KL(posterior || prior) and
//! the mixture regulariser.

use crate::batch::Sequences;
use crate::error::{shape, Result};
use crate::model::TrainOutput;
use tch::{Kind, Tensor};

/// `[batch, steps]` float mask; step `t` is a label iff `t < length - 1`.
pub fn response_masks(lengths: &Tensor, steps: i64) -> Tensor {
    let positions = Tensor::arange(steps, (Kind::Int64, lengths.device())).unsqueeze(0);
    positions.lt_tensor(&(lengths - 1).unsqueeze(1)).to_kind(Kind::Float)
}

/// Token-mean negative log-likelihood of `responses[:, 1..]` under
/// `output_vocab` (`[batch, len - 1, vocab]` probabilities).
pub fn reconstruction_nll(output_vocab: &Tensor, responses: &Sequences) -> Result<Tensor> {
    let (batch_size, steps, _) = output_vocab.size3()?;
    if responses.batch_size() != batch_size || responses.time() - 1 != steps {
        return Err(shape(format!(
            "distribution {:?} does not cover responses {:?}",
            output_vocab.size(),
            responses.ids().size()
        )));
    }
    let labels = responses.ids().narrow(1, 1, steps).unsqueeze(2);
    let log_probs = output_vocab.gather(2, &labels, false).squeeze_dim(2).clamp_min(1e-12).log();
    let masks = response_masks(responses.lengths(), steps);
    let tokens = masks.sum(Kind::Float).clamp_min(1.0);
    Ok(-(log_probs * &masks).sum(Kind::Float) / tokens)
}

#[derive(Debug)]
pub struct ElboTerms {
    pub nll: Tensor,
    pub kl: Tensor,
    pub mixture: Tensor,
    pub total: Tensor,
}

impl ElboTerms {
    pub fn new(output: &TrainOutput, responses: &Sequences, kl_weight: f64, mixture_weight: f64) -> Result<Self> {
        let nll = reconstruction_nll(&output.output_vocab, responses)?;
        let kl = output.posterior.kl_divergence(&output.prior).mean(Kind::Float);
        let mixture = output.mixture_loss.shallow_clone();
        let total = &nll + &kl * kl_weight + &mixture * mixture_weight;
        Ok(Self { nll, kl, mixture, total })
    }
}
