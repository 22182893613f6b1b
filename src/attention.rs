// src/attention.rs

//! Alignment scoring shared by the three context-fusion stages.

use crate::error::{Error, Result};
use std::{fmt, str::FromStr};
use tch::{nn, nn::Path, Kind, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMethod {
    Dot,
    General,
    Concat,
}

impl FromStr for ScoreMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dot" => Ok(ScoreMethod::Dot),
            "general" => Ok(ScoreMethod::General),
            "concat" => Ok(ScoreMethod::Concat),
            other => Err(Error::InvalidConfig(format!(
                "`{other}` is not an attention method (expected dot, general or concat)"
            ))),
        }
    }
}

impl fmt::Display for ScoreMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScoreMethod::Dot => "dot",
            ScoreMethod::General => "general",
            ScoreMethod::Concat => "concat",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Scorer {
    Dot,
    General { attn: nn::Linear },
    Concat { attn: nn::Linear, v: Tensor },
}

/// Produces softmax-normalised weights of a query over a time-major key set.
#[derive(Debug)]
pub struct AttentionScorer {
    method: ScoreMethod,
    scorer: Scorer,
}

impl AttentionScorer {
    /// Fails before allocating any parameter if `method` is not recognised.
    pub fn new(p: &Path, method: &str, hidden_size: i64) -> Result<Self> {
        let method: ScoreMethod = method.parse()?;
        let scorer = match method {
            ScoreMethod::Dot => Scorer::Dot,
            ScoreMethod::General => Scorer::General {
                attn: nn::linear(p / "attn", hidden_size, hidden_size, Default::default()),
            },
            ScoreMethod::Concat => {
                let bound = 1.0 / (hidden_size as f64).sqrt();
                Scorer::Concat {
                    attn: nn::linear(p / "attn", hidden_size * 2, hidden_size, Default::default()),
                    v: p.var("v", &[hidden_size], nn::Init::Uniform { lo: -bound, up: bound }),
                }
            }
        };
        Ok(Self { method, scorer })
    }

    pub fn method(&self) -> ScoreMethod {
        self.method
    }

    /// `query` broadcasts to `keys`, which are `[time, batch, dim]`.
    /// Returns weights of shape `[batch, 1, time]`, normalised over time.
    pub fn forward(&self, query: &Tensor, keys: &Tensor) -> Tensor {
        let energies = match &self.scorer {
            Scorer::Dot => (query * keys).sum_dim_intlist(2, false, Kind::Float),
            Scorer::General { attn } => (query * keys.apply(attn)).sum_dim_intlist(2, false, Kind::Float),
            Scorer::Concat { attn, v } => {
                let query = query.expand_as(keys);
                let energy = Tensor::cat(&[&query, keys], 2).apply(attn).tanh();
                (v * energy).sum_dim_intlist(2, false, Kind::Float)
            }
        };
        energies.transpose(0, 1).softmax(1, Kind::Float).unsqueeze(1)
    }
}
