// src/decoder.rs

use crate::config::RnnConfig;
use crate::error::{shape, Result};
use crate::recurrent::{RecurrentCell, RecurrentState};
use log::debug;
use tch::{nn, nn::Module, nn::Path, Kind, Tensor};

/// Hidden state → normalised distribution over the vocabulary.
#[derive(Debug)]
pub struct VocabProjector {
    linear: nn::Linear,
}

impl VocabProjector {
    pub fn new(p: &Path, hidden_size: i64, num_vocab: i64) -> Self {
        Self { linear: nn::linear(p / "linear", hidden_size, num_vocab, Default::default()) }
    }
}

impl Module for VocabProjector {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.apply(&self.linear).softmax(-1, Kind::Float)
    }
}

/// Greedy decoding result: hidden outputs `[batch, steps, hidden]` and the
/// arg-max token chosen at each step `[batch, steps]`.
#[derive(Debug)]
pub struct GreedyOutput {
    pub hidden: Tensor,
    pub tokens: Tensor,
}

#[derive(Debug)]
pub struct AutoRegressiveDecoder {
    cell: RecurrentCell,
    start_id: i64,
    end_id: i64,
}

impl AutoRegressiveDecoder {
    pub fn new(p: &Path, input_size: i64, config: &RnnConfig, start_id: i64, end_id: i64) -> Self {
        Self { cell: RecurrentCell::new(p, input_size, config), start_id, end_id }
    }

    /// Feeds the ground-truth inputs (`[batch, steps, e]`) one step at a time.
    pub fn teacher_forced(&self, inputs: &Tensor, state: RecurrentState) -> Result<Tensor> {
        let steps = inputs.size3()?.1;
        if steps == 0 {
            return Err(shape("teacher forcing needs at least one input step"));
        }
        let mut state = state;
        let mut outputs = Vec::with_capacity(steps as usize);
        for idx in 0..steps {
            let (output, next) = self.cell.step(&inputs.narrow(1, idx, 1), &state)?;
            outputs.push(output);
            state = next;
        }
        Ok(Tensor::cat(&outputs, 1))
    }

    /// Starts from the start token and feeds back each step's arg-max token.
    /// With `early_stop`, stops once every example has emitted the end token.
    pub fn greedy(
        &self,
        embedding: &impl Module,
        projector: &VocabProjector,
        state: RecurrentState,
        max_len: i64,
        early_stop: bool,
    ) -> Result<GreedyOutput> {
        if max_len <= 0 {
            return Err(shape(format!("max_len must be positive, got {max_len}")));
        }
        let batch_size = state.hidden().size()[1];
        let device = state.hidden().device();

        let mut state = state;
        let mut input_ids = Tensor::full([batch_size, 1], self.start_id, (Kind::Int64, device));
        let mut done = Tensor::zeros([batch_size], (Kind::Bool, device));
        let mut outputs = Vec::new();
        let mut tokens = Vec::new();

        for idx in 0..max_len {
            let (output, next) = self.cell.step(&embedding.forward(&input_ids), &state)?;
            state = next;
            let next_ids = output.apply(projector).argmax(-1, false);
            outputs.push(output);
            tokens.push(next_ids.shallow_clone());

            done = done.logical_or(&next_ids.squeeze_dim(1).eq(self.end_id));
            if early_stop && done.sum(Kind::Int64).int64_value(&[]) == batch_size {
                debug!("greedy decoding finished every example after {} steps", idx + 1);
                break;
            }
            input_ids = next_ids;
        }

        Ok(GreedyOutput { hidden: Tensor::cat(&outputs, 1), tokens: Tensor::cat(&tokens, 1) })
    }
}
