// src/context.rs

//! Topic context: a corpus-level semantic vector built from a pool of
//! reference sentences, and the keyword → topic → global attention chain
//! that turns keywords into the sequence fed to the topic encoder.

use crate::attention::AttentionScorer;
use crate::config::{CellType, RnnConfig};
use crate::error::{shape, Result};
use crate::recurrent::RecurrentEncoder;
use tch::{nn::Module, nn::Path, Tensor};

/// Two-level reduction of the reference pool. The same encoder reads words
/// into sentence vectors, then reads the sentence vectors as one sequence.
#[derive(Debug)]
pub struct HierarchicalContextEncoder {
    word_encoder: RecurrentEncoder,
}

impl HierarchicalContextEncoder {
    /// The encoder's hidden size equals `embedding_size` so that a sentence
    /// vector is a valid input to the sentence-level pass.
    pub fn new(p: &Path, embedding_size: i64, cell_type: CellType, num_layers: i64) -> Self {
        let config = RnnConfig { cell_type, output_size: embedding_size, num_layers };
        Self { word_encoder: RecurrentEncoder::new(p, embedding_size, &config) }
    }

    /// Returns the global semantic vector, `[embedding_size]`.
    pub fn encode(&self, embedding: &impl Module, ids: &Tensor, lengths: &Tensor) -> Result<Tensor> {
        let embedded = embedding.forward(ids);
        let (_, word_state) = self.word_encoder.encode(&embedded, lengths)?;
        let sentences = word_state.last_layer().unsqueeze(0);

        let pool_size = sentences.size()[1];
        let pool_length = Tensor::from_slice(&[pool_size]).to_device(sentences.device());
        let (_, sentence_state) = self.word_encoder.encode(&sentences, &pool_length)?;
        Ok(sentence_state.last_layer().squeeze_dim(0))
    }
}

/// Selects the scorer used by the topic-conditioned stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicStage {
    Dedicated,
    KeywordScorer,
}

#[derive(Debug)]
pub struct ContextFusion {
    keyword: AttentionScorer,
    topic: AttentionScorer,
    global: AttentionScorer,
}

impl ContextFusion {
    pub fn new(keyword: AttentionScorer, topic: AttentionScorer, global: AttentionScorer) -> Self {
        Self { keyword, topic, global }
    }

    /// `keywords` is `[batch, n, e]`, `topic` is `[batch, 1, e]` and
    /// `global_sem` is `[e]`. Returns `[batch, n, 2e]`.
    pub fn fuse(&self, keywords: &Tensor, topic: &Tensor, global_sem: &Tensor, stage: TopicStage) -> Result<Tensor> {
        let (batch_size, n, e) = keywords.size3()?;
        if n == 0 {
            return Err(shape("keyword sequence is empty"));
        }
        if topic.size() != [batch_size, 1, e] {
            return Err(shape(format!(
                "topic embedding {:?} does not match keywords [{batch_size}, {n}, {e}]",
                topic.size()
            )));
        }
        if global_sem.size() != [e] {
            return Err(shape(format!("global semantic vector {:?} is not [{e}]", global_sem.size())));
        }

        // keyword self-attention: row i holds position i's weights over all keywords
        let keys = keywords.transpose(0, 1);
        let rows: Vec<Tensor> = (0..n)
            .map(|i| self.keyword.forward(&keys.narrow(0, i, 1), &keys))
            .collect();
        let ri = Tensor::cat(&rows, 1).bmm(keywords);

        let topic_scorer = match stage {
            TopicStage::Dedicated => &self.topic,
            TopicStage::KeywordScorer => &self.keyword,
        };
        let topic_weights = topic_scorer.forward(&topic.transpose(0, 1), &ri.transpose(0, 1));
        let ti = topic_weights.transpose(1, 2).bmm(topic);

        let global = global_sem.view([1, 1, e]).expand([batch_size, 1, e], false).contiguous();
        let global_weights = self.global.forward(&global.transpose(0, 1), &ti.transpose(0, 1));
        let si = global_weights.transpose(1, 2).bmm(&global);

        Ok(Tensor::cat(&[si, topic.expand([batch_size, n, e], false)], 2))
    }
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn, nn::VarStore, Device, Kind};

    fn fusion(vs: &VarStore, e: i64) -> ContextFusion {
        let root = vs.root();
        ContextFusion::new(
            AttentionScorer::new(&(&root / "one"), "concat", e).unwrap(),
            AttentionScorer::new(&(&root / "two"), "concat", e).unwrap(),
            AttentionScorer::new(&(&root / "three"), "concat", e).unwrap(),
        )
    }

    #[test]
    fn pool_reduces_to_one_vector() {
        tch::manual_seed(11);
        let vs = VarStore::new(Device::Cpu);
        let embedding = nn::embedding(vs.root() / "embedding", 20, 6, Default::default());
        let encoder = HierarchicalContextEncoder::new(&(vs.root() / "word_encoder"), 6, CellType::Lstm, 1);
        let ids = Tensor::randint(20, [10, 4], (Kind::Int64, Device::Cpu));
        let lengths = Tensor::from_slice(&[4i64, 3, 4, 1, 2, 4, 4, 3, 2, 4]);
        let global = encoder.encode(&embedding, &ids, &lengths).unwrap();
        assert_eq!(global.size(), [6]);
    }

    #[test]
    fn fused_sequence_pairs_semantics_with_topic() {
        tch::manual_seed(5);
        let vs = VarStore::new(Device::Cpu);
        let fusion = fusion(&vs, 4);
        let keywords = Tensor::randn([2, 3, 4], (Kind::Float, Device::Cpu));
        let topic = Tensor::randn([2, 1, 4], (Kind::Float, Device::Cpu));
        let global = Tensor::randn([4], (Kind::Float, Device::Cpu));

        for stage in [TopicStage::Dedicated, TopicStage::KeywordScorer] {
            let ui = fusion.fuse(&keywords, &topic, &global, stage).unwrap();
            assert_eq!(ui.size(), [2, 3, 8]);
            let topic_half = ui.narrow(2, 4, 4);
            assert!(topic_half.allclose(&topic.expand([2, 3, 4], false), 1e-6, 1e-6, false));
        }
    }

    #[test]
    fn semantic_half_is_a_convex_rescaling_of_the_global_vector() {
        let vs = VarStore::new(Device::Cpu);
        let fusion = fusion(&vs, 4);
        let keywords = Tensor::randn([1, 5, 4], (Kind::Float, Device::Cpu));
        let topic = Tensor::randn([1, 1, 4], (Kind::Float, Device::Cpu));
        let global = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0]);
        let si = fusion.fuse(&keywords, &topic, &global, TopicStage::Dedicated).unwrap().narrow(2, 0, 4);
        // the weights over the keyword axis sum to one
        let summed = si.sum_dim_intlist(1, false, Kind::Float).view([4]);
        assert!(summed.allclose(&global, 1e-5, 1e-5, false));
    }

    #[test]
    fn multi_token_topics_are_rejected() {
        let vs = VarStore::new(Device::Cpu);
        let fusion = fusion(&vs, 4);
        let keywords = Tensor::zeros([2, 3, 4], (Kind::Float, Device::Cpu));
        let topic = Tensor::zeros([2, 2, 4], (Kind::Float, Device::Cpu));
        let global = Tensor::zeros([4], (Kind::Float, Device::Cpu));
        assert!(fusion.fuse(&keywords, &topic, &global, TopicStage::Dedicated).is_err());
    }

    #[test]
    fn empty_keyword_sequences_are_rejected() {
        let vs = VarStore::new(Device::Cpu);
        let fusion = fusion(&vs, 4);
        let keywords = Tensor::zeros([2, 0, 4], (Kind::Float, Device::Cpu));
        let topic = Tensor::zeros([2, 1, 4], (Kind::Float, Device::Cpu));
        let global = Tensor::zeros([4], (Kind::Float, Device::Cpu));
        assert!(matches!(
            fusion.fuse(&keywords, &topic, &global, TopicStage::Dedicated),
            Err(crate::error::Error::ShapeMismatch(_))
        ));
    }
}
