// src/config.rs

//! Model hyperparameters. Loaded from and saved to JSON so that `train` and
//! `generate` agree on the architecture a checkpoint was built with.

use crate::attention::ScoreMethod;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CellType {
    Gru,
    Lstm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RnnConfig {
    pub cell_type: CellType,
    pub output_size: i64,
    pub num_layers: i64,
}

impl RnnConfig {
    fn validate(&self, name: &str) -> Result<()> {
        if self.output_size <= 0 || self.num_layers <= 0 {
            return Err(Error::InvalidConfig(format!(
                "{name}: output_size and num_layers must be positive (got {} and {})",
                self.output_size, self.num_layers
            )));
        }
        Ok(())
    }
}

/// Which scorer the topic-conditioned attention uses on the inference path.
///
/// Checkpoints trained by the reference system were decoded with the keyword
/// scorer in that slot, so `Keyword` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceTopicScorer {
    #[default]
    Keyword,
    Dedicated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub num_vocab: i64,
    pub embedding_size: i64,
    pub pad_id: i64,
    pub start_id: i64,
    pub end_id: i64,
    pub dropout: f64,
    pub post_encoder: RnnConfig,
    pub response_encoder: RnnConfig,
    pub decoder: RnnConfig,
    pub latent_size: i64,
    pub dims_prior: Vec<i64>,
    pub dims_recognize: Vec<i64>,
    pub n_clusters: i64,
    pub attention_method: String,
    pub max_decode_len: i64,
    pub inference_topic_scorer: InferenceTopicScorer,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_vocab: 39000,
            embedding_size: 300,
            pad_id: 0,
            start_id: 1,
            end_id: 2,
            dropout: 0.2,
            post_encoder: RnnConfig { cell_type: CellType::Lstm, output_size: 300, num_layers: 2 },
            response_encoder: RnnConfig { cell_type: CellType::Lstm, output_size: 300, num_layers: 2 },
            decoder: RnnConfig { cell_type: CellType::Lstm, output_size: 300, num_layers: 2 },
            latent_size: 200,
            dims_prior: vec![250],
            dims_recognize: vec![250],
            n_clusters: 10,
            attention_method: "concat".to_string(),
            max_decode_len: 60,
            inference_topic_scorer: InferenceTopicScorer::default(),
        }
    }
}

impl ModelConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("num_vocab", self.num_vocab),
            ("embedding_size", self.embedding_size),
            ("latent_size", self.latent_size),
            ("n_clusters", self.n_clusters),
            ("max_decode_len", self.max_decode_len),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(Error::InvalidConfig(format!("{name} must be positive, got {value}")));
            }
        }
        for (name, id) in [("pad_id", self.pad_id), ("start_id", self.start_id), ("end_id", self.end_id)] {
            if id < 0 || id >= self.num_vocab {
                return Err(Error::InvalidConfig(format!(
                    "{name} {id} is outside the vocabulary of size {}",
                    self.num_vocab
                )));
            }
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!("dropout must lie in [0, 1), got {}", self.dropout)));
        }
        if self.dims_prior.iter().chain(&self.dims_recognize).any(|&d| d <= 0) {
            return Err(Error::InvalidConfig("hidden layer sizes must be positive".to_string()));
        }
        self.post_encoder.validate("post_encoder")?;
        self.response_encoder.validate("response_encoder")?;
        self.decoder.validate("decoder")?;
        self.attention_method.parse::<ScoreMethod>()?;
        Ok(())
    }
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ModelConfig::default().validate().is_ok());
    }

    #[test]
    fn unknown_attention_method_is_rejected() {
        let config = ModelConfig { attention_method: "bilinear".to_string(), ..Default::default() };
        match config.validate() {
            Err(Error::InvalidConfig(msg)) => assert!(msg.contains("bilinear")),
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn special_ids_must_fit_the_vocabulary() {
        let config = ModelConfig { num_vocab: 10, end_id: 10, ..Default::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn json_round_trip_keeps_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = ModelConfig {
            n_clusters: 4,
            inference_topic_scorer: InferenceTopicScorer::Dedicated,
            decoder: RnnConfig { cell_type: CellType::Gru, output_size: 32, num_layers: 1 },
            ..Default::default()
        };
        config.to_json_file(&path).unwrap();
        assert_eq!(ModelConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ModelConfig = serde_json::from_str(r#"{"num_vocab": 500, "decoder": {"cell_type": "GRU", "output_size": 64, "num_layers": 1}}"#).unwrap();
        assert_eq!(config.num_vocab, 500);
        assert_eq!(config.decoder.cell_type, CellType::Gru);
        assert_eq!(config.latent_size, ModelConfig::default().latent_size);
    }
}
