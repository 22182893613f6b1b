// src/recurrent.rs

//! Recurrent building blocks: a GRU/LSTM cell wrapper, the state it threads,
//! a length-aware sequence encoder and the latent-to-decoder-state bridge.

use crate::config::{CellType, RnnConfig};
use crate::error::{shape, Result};
use tch::{nn, nn::Path, nn::RNN, Device, Kind, Tensor};

/// Hidden state of a recurrent cell, `[num_layers, batch, hidden]` per component.
#[derive(Debug)]
pub enum RecurrentState {
    Single(Tensor),
    Dual(Tensor, Tensor),
}

impl RecurrentState {
    pub fn hidden(&self) -> &Tensor {
        match self {
            RecurrentState::Single(h) | RecurrentState::Dual(h, _) => h,
        }
    }

    /// Hidden state of the top layer, `[batch, hidden]`.
    pub fn last_layer(&self) -> Tensor {
        self.hidden().select(0, -1)
    }

    /// Takes `next` where `keep` (`[batch]`, bool) is set, `self` elsewhere.
    fn commit(self, next: RecurrentState, keep: &Tensor) -> RecurrentState {
        let keep = keep.view([1, -1, 1]);
        match (self, next) {
            (RecurrentState::Dual(h, c), RecurrentState::Dual(nh, nc)) => {
                RecurrentState::Dual(nh.where_self(&keep, &h), nc.where_self(&keep, &c))
            }
            (RecurrentState::Single(h), next) => RecurrentState::Single(next.hidden().where_self(&keep, &h)),
            (old @ RecurrentState::Dual(..), next) => {
                let h = next.hidden().where_self(&keep, old.hidden());
                RecurrentState::Single(h)
            }
        }
    }
}

#[derive(Debug)]
enum Cell {
    Gru(nn::GRU),
    Lstm(nn::LSTM),
}

/// A multi-layer unidirectional GRU or LSTM, batch-first.
#[derive(Debug)]
pub struct RecurrentCell {
    cell: Cell,
    num_layers: i64,
    hidden_size: i64,
}

impl RecurrentCell {
    pub fn new(p: &Path, input_size: i64, config: &RnnConfig) -> Self {
        // no inter-layer dropout; callers drop out the embedded inputs
        let rnn_config = nn::RNNConfig {
            num_layers: config.num_layers,
            batch_first: true,
            ..Default::default()
        };
        let cell = match config.cell_type {
            CellType::Gru => Cell::Gru(nn::gru(p, input_size, config.output_size, rnn_config)),
            CellType::Lstm => Cell::Lstm(nn::lstm(p, input_size, config.output_size, rnn_config)),
        };
        Self { cell, num_layers: config.num_layers, hidden_size: config.output_size }
    }

    pub fn hidden_size(&self) -> i64 {
        self.hidden_size
    }

    pub fn num_layers(&self) -> i64 {
        self.num_layers
    }

    pub fn is_dual(&self) -> bool {
        matches!(self.cell, Cell::Lstm(_))
    }

    pub fn zero_state(&self, batch_size: i64, device: Device) -> RecurrentState {
        let zeros = || Tensor::zeros([self.num_layers, batch_size, self.hidden_size], (Kind::Float, device));
        match self.cell {
            Cell::Gru(_) => RecurrentState::Single(zeros()),
            Cell::Lstm(_) => RecurrentState::Dual(zeros(), zeros()),
        }
    }

    /// Runs `input` (`[batch, time, in]`) from `state`; returns the top-layer
    /// outputs `[batch, time, hidden]` and the final state.
    pub fn run(&self, input: &Tensor, state: &RecurrentState) -> Result<(Tensor, RecurrentState)> {
        match (&self.cell, state) {
            (Cell::Gru(gru), RecurrentState::Single(h)) => {
                let (out, next) = gru.seq_init(input, &nn::GRUState(h.shallow_clone()));
                Ok((out, RecurrentState::Single(next.0)))
            }
            (Cell::Lstm(lstm), RecurrentState::Dual(h, c)) => {
                let (out, next) = lstm.seq_init(input, &nn::LSTMState((h.shallow_clone(), c.shallow_clone())));
                let (h, c) = next.0;
                Ok((out, RecurrentState::Dual(h, c)))
            }
            _ => Err(shape(format!(
                "a {} cell cannot continue from a {} state",
                if self.is_dual() { "dual-state" } else { "single-state" },
                if self.is_dual() { "single" } else { "dual" }
            ))),
        }
    }

    /// One decoding step: `input` is `[batch, 1, in]`.
    pub fn step(&self, input: &Tensor, state: &RecurrentState) -> Result<(Tensor, RecurrentState)> {
        self.run(input, state)
    }
}

/// Encodes padded sequences; only the first `lengths[i]` steps of example `i`
/// reach its final state.
#[derive(Debug)]
pub struct RecurrentEncoder {
    cell: RecurrentCell,
}

impl RecurrentEncoder {
    pub fn new(p: &Path, input_size: i64, config: &RnnConfig) -> Self {
        Self { cell: RecurrentCell::new(p, input_size, config) }
    }

    pub fn output_size(&self) -> i64 {
        self.cell.hidden_size()
    }

    /// `embedded` is `[batch, time, in]`, `lengths` is `[batch]`.
    /// Outputs are zero past each example's length.
    pub fn encode(&self, embedded: &Tensor, lengths: &Tensor) -> Result<(Tensor, RecurrentState)> {
        let (batch_size, time, _) = embedded.size3()?;
        if lengths.size() != [batch_size] {
            return Err(shape(format!(
                "lengths {:?} do not match a batch of {batch_size}",
                lengths.size()
            )));
        }
        if time == 0 {
            return Err(shape("cannot encode an empty sequence"));
        }
        let lengths = lengths.to_device(embedded.device());
        let mut state = self.cell.zero_state(batch_size, embedded.device());
        let mut outputs = Vec::with_capacity(time as usize);
        for t in 0..time {
            let (out, next) = self.cell.run(&embedded.narrow(1, t, 1), &state)?;
            let keep = lengths.gt(t);
            outputs.push(out * keep.view([-1, 1, 1]).to_kind(Kind::Float));
            state = state.commit(next, &keep);
        }
        Ok((Tensor::cat(&outputs, 1), state))
    }
}

/// Maps the concatenated `[z, x]` vector to the decoder's initial state.
#[derive(Debug)]
pub struct PrepareState {
    linear: nn::Linear,
    num_layers: i64,
    hidden_size: i64,
    dual: bool,
}

impl PrepareState {
    pub fn new(p: &Path, input_size: i64, decoder: &RnnConfig) -> Self {
        let linear = nn::linear(p / "linear", input_size, decoder.num_layers * decoder.output_size, Default::default());
        Self {
            linear,
            num_layers: decoder.num_layers,
            hidden_size: decoder.output_size,
            dual: decoder.cell_type == CellType::Lstm,
        }
    }

    pub fn forward(&self, xs: &Tensor) -> RecurrentState {
        let batch_size = xs.size()[0];
        let hidden = xs
            .apply(&self.linear)
            .tanh()
            .view([batch_size, self.num_layers, self.hidden_size])
            .transpose(0, 1)
            .contiguous();
        if self.dual {
            let cell = hidden.zeros_like();
            RecurrentState::Dual(hidden, cell)
        } else {
            RecurrentState::Single(hidden)
        }
    }
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn::VarStore;

    fn rnn(cell_type: CellType) -> RnnConfig {
        RnnConfig { cell_type, output_size: 5, num_layers: 2 }
    }

    #[test]
    fn padding_never_reaches_the_final_state() {
        tch::manual_seed(3);
        for cell_type in [CellType::Gru, CellType::Lstm] {
            let vs = VarStore::new(Device::Cpu);
            let encoder = RecurrentEncoder::new(&vs.root(), 4, &rnn(cell_type));

            let short = Tensor::randn([1, 2, 4], (Kind::Float, Device::Cpu));
            let noise = Tensor::randn([1, 3, 4], (Kind::Float, Device::Cpu)) * 10.0;
            let padded = Tensor::cat(&[&short, &noise], 1);

            let (_, alone) = encoder.encode(&short, &Tensor::from_slice(&[2i64])).unwrap();
            let (outputs, masked) = encoder.encode(&padded, &Tensor::from_slice(&[2i64])).unwrap();

            assert_eq!(outputs.size(), [1, 5, 5]);
            assert!(alone.hidden().allclose(masked.hidden(), 1e-5, 1e-6, false));
            assert_eq!(outputs.narrow(1, 2, 3).abs().sum(Kind::Float).double_value(&[]), 0.0);
            assert_eq!(masked.last_layer().size(), [1, 5]);
        }
    }

    #[test]
    fn lstm_state_is_dual_and_gru_state_single() {
        let vs = VarStore::new(Device::Cpu);
        let gru = RecurrentCell::new(&(vs.root() / "gru"), 3, &rnn(CellType::Gru));
        let lstm = RecurrentCell::new(&(vs.root() / "lstm"), 3, &rnn(CellType::Lstm));
        assert!(matches!(gru.zero_state(2, Device::Cpu), RecurrentState::Single(_)));
        assert!(matches!(lstm.zero_state(2, Device::Cpu), RecurrentState::Dual(..)));
        assert!(gru.run(&Tensor::zeros([2, 1, 3], (Kind::Float, Device::Cpu)), &lstm.zero_state(2, Device::Cpu)).is_err());
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let vs = VarStore::new(Device::Cpu);
        let encoder = RecurrentEncoder::new(&vs.root(), 4, &rnn(CellType::Gru));
        let xs = Tensor::zeros([3, 2, 4], (Kind::Float, Device::Cpu));
        assert!(encoder.encode(&xs, &Tensor::from_slice(&[2i64, 2])).is_err());
    }

    #[test]
    fn prepared_state_has_decoder_layout() {
        let vs = VarStore::new(Device::Cpu);
        let decoder = RnnConfig { cell_type: CellType::Lstm, output_size: 6, num_layers: 3 };
        let prepare = PrepareState::new(&vs.root(), 10, &decoder);
        let state = prepare.forward(&Tensor::ones([4, 10], (Kind::Float, Device::Cpu)));
        match state {
            RecurrentState::Dual(h, c) => {
                assert_eq!(h.size(), [3, 4, 6]);
                assert_eq!(c.abs().sum(Kind::Float).double_value(&[]), 0.0);
            }
            RecurrentState::Single(_) => panic!("an LSTM decoder needs a cell state"),
        }
    }
}
