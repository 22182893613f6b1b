// src/lib.rs

//! Topic-aware conditional variational dialogue generation.
//!
//! A post is encoded together with a topic context (keywords fused with a
//! topic token and a corpus-level semantic vector), a latent response code is
//! drawn from a learned prior or posterior, and an autoregressive decoder
//! produces the response. A Gaussian mixture over the latent space clusters
//! responses without supervision.

pub mod attention;
pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod data;
pub mod decoder;
pub mod error;
pub mod latent;
pub mod loss;
pub mod metrics;
pub mod mixture;
pub mod model;
pub mod recurrent;
pub mod text_processing;

pub use batch::{ClusterBatch, InferenceBatch, ReferencePool, Sequences, TopicInputs, TrainBatch};
pub use config::{CellType, InferenceTopicScorer, ModelConfig, RnnConfig};
pub use error::{Error, Result};
pub use model::{DialogueModel, InferenceOutput, TrainOutput};
