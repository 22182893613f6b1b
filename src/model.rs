// src/model.rs

//! The complete topic-aware conditional VAE. One forward call builds the
//! global semantic vector, fuses keywords with topic and semantics, encodes
//! post, response and topic context, samples the latent and decodes.

use crate::attention::AttentionScorer;
use crate::batch::{check_batch, ClusterBatch, InferenceBatch, ReferencePool, TopicInputs, TrainBatch};
use crate::config::{InferenceTopicScorer, ModelConfig};
use crate::context::{ContextFusion, HierarchicalContextEncoder, TopicStage};
use crate::decoder::{AutoRegressiveDecoder, VocabProjector};
use crate::error::{shape, Error, Result};
use crate::latent::{GaussianParams, PosteriorPriorNetwork};
use crate::mixture::GaussianMixture;
use crate::recurrent::{PrepareState, RecurrentEncoder};
use log::info;
use tch::{nn, Kind, Tensor};

/// Result of a teacher-forced forward call.
#[derive(Debug)]
pub struct TrainOutput {
    /// `[batch, response_len - 1, num_vocab]`
    pub output_vocab: Tensor,
    pub prior: GaussianParams,
    pub posterior: GaussianParams,
    /// `[batch, n_clusters]`
    pub responsibilities: Tensor,
    pub mixture_loss: Tensor,
}

/// Result of a greedy decoding call.
#[derive(Debug)]
pub struct InferenceOutput {
    /// `[batch, steps, num_vocab]`, `steps <= max_len`
    pub output_vocab: Tensor,
    /// `[batch, steps]`
    pub tokens: Tensor,
    pub prior: GaussianParams,
}

#[derive(Debug)]
pub struct DialogueModel {
    config: ModelConfig,
    embedding: nn::Embedding,
    post_encoder: RecurrentEncoder,
    response_encoder: RecurrentEncoder,
    topic_encoder: RecurrentEncoder,
    context_encoder: HierarchicalContextEncoder,
    fusion: ContextFusion,
    latent: PosteriorPriorNetwork,
    mixture: GaussianMixture,
    prepare_state: PrepareState,
    decoder: AutoRegressiveDecoder,
    projector: VocabProjector,
}

impl DialogueModel {
    pub fn new(vs: &nn::VarStore, config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        let p = &vs.root();
        let e = config.embedding_size;

        let fusion = ContextFusion::new(
            AttentionScorer::new(&(p / "keyword_attention"), &config.attention_method, e)?,
            AttentionScorer::new(&(p / "topic_attention"), &config.attention_method, e)?,
            AttentionScorer::new(&(p / "global_attention"), &config.attention_method, e)?,
        );

        let embedding_config = nn::EmbeddingConfig { padding_idx: config.pad_id, ..Default::default() };
        let embedding = nn::embedding(p / "embedding", config.num_vocab, e, embedding_config);

        let post_encoder = RecurrentEncoder::new(&(p / "post_encoder"), e, &config.post_encoder);
        let response_encoder = RecurrentEncoder::new(&(p / "response_encoder"), e, &config.response_encoder);
        let topic_encoder = RecurrentEncoder::new(&(p / "topic_encoder"), e * 2, &config.response_encoder);
        let context_encoder = HierarchicalContextEncoder::new(
            &(p / "word_encoder"),
            e,
            config.response_encoder.cell_type,
            config.response_encoder.num_layers,
        );

        let post_size = config.post_encoder.output_size;
        let response_size = config.response_encoder.output_size;
        let latent = PosteriorPriorNetwork::new(
            &(p / "prior_net"),
            &(p / "recognize_net"),
            post_size,
            response_size,
            response_size,
            config.latent_size,
            &config.dims_prior,
            &config.dims_recognize,
        );
        let mixture = GaussianMixture::new(&(p / "mixture"), config.n_clusters, config.latent_size);

        let prepare_state = PrepareState::new(&(p / "prepare_state"), post_size + config.latent_size, &config.decoder);
        let decoder = AutoRegressiveDecoder::new(&(p / "decoder"), e, &config.decoder, config.start_id, config.end_id);
        let projector = VocabProjector::new(&(p / "projector"), config.decoder.output_size, config.num_vocab);

        let parameters: usize = vs.trainable_variables().iter().map(Tensor::numel).sum();
        info!("dialogue model built with {parameters} trainable parameters");

        Ok(Self {
            config: config.clone(),
            embedding,
            post_encoder,
            response_encoder,
            topic_encoder,
            context_encoder,
            fusion,
            latent,
            mixture,
            prepare_state,
            decoder,
            projector,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn mixture(&self) -> &GaussianMixture {
        &self.mixture
    }

    /// Mutable access for seeding the mixture outside an optimizer step.
    pub fn mixture_mut(&mut self) -> &mut GaussianMixture {
        &mut self.mixture
    }

    fn embed(&self, ids: &Tensor, train: bool) -> Tensor {
        ids.apply(&self.embedding).dropout(self.config.dropout, train)
    }

    fn check_latents(&self, latents: &Tensor) -> Result<()> {
        match latents.size().as_slice() {
            [_, d] if *d == self.config.latent_size => Ok(()),
            other => Err(shape(format!(
                "sampled latents {other:?} are not [batch, {}]",
                self.config.latent_size
            ))),
        }
    }

    /// Global semantic vector of the reference pool, `[embedding_size]`.
    pub fn global_semantics(&self, pool: &ReferencePool) -> Result<Tensor> {
        let sentences = &pool.sentences;
        self.context_encoder.encode(&self.embedding, sentences.ids(), sentences.lengths())
    }

    fn topic_vector(&self, topic: &TopicInputs, pool: &ReferencePool, train: bool, stage: TopicStage) -> Result<Tensor> {
        let global_sem = self.global_semantics(pool)?;
        let keywords = self.embed(topic.keywords.ids(), train);
        let topic_embedding = self.embed(&topic.topic, train);
        let ui = self.fusion.fuse(&keywords, &topic_embedding, &global_sem, stage)?;
        let (_, state) = self.topic_encoder.encode(&ui, topic.keywords.lengths())?;
        Ok(state.last_layer())
    }

    /// Teacher-forced forward pass. Posterior statistics are returned to the
    /// caller rather than kept on the model.
    pub fn forward_t(&self, batch: &TrainBatch, pool: &ReferencePool, train: bool) -> Result<TrainOutput> {
        check_batch(&[
            ("posts", batch.posts.batch_size()),
            ("responses", batch.responses.batch_size()),
            ("keywords", batch.topic.keywords.batch_size()),
            ("topic", batch.topic.topic.size()[0]),
            ("sampled_latents", batch.sampled_latents.size()[0]),
        ])?;
        self.check_latents(&batch.sampled_latents)?;
        let steps = batch.responses.time() - 1;
        if steps < 1 {
            return Err(shape("responses need at least two tokens for teacher forcing"));
        }

        let embed_posts = self.embed(batch.posts.ids(), train);
        let embed_responses = self.embed(batch.responses.ids(), train);
        let t = self.topic_vector(&batch.topic, pool, train, TopicStage::Dedicated)?;

        let (_, state_posts) = self.post_encoder.encode(&embed_posts, batch.posts.lengths())?;
        let (_, state_responses) = self.response_encoder.encode(&embed_responses, batch.responses.lengths())?;
        let x = state_posts.last_layer();
        let y = state_responses.last_layer();

        let prior = self.latent.prior(&x, &t);
        let posterior = self.latent.posterior(&x, &y, &t);
        let z = posterior.sample(&batch.sampled_latents)?;

        let responsibilities = self.mixture.responsibilities(&z)?;
        let mixture_loss = self.mixture.loss(&posterior, &responsibilities);

        let first_state = self.prepare_state.forward(&Tensor::cat(&[&z, &x], 1));
        let hidden = self.decoder.teacher_forced(&embed_responses.narrow(1, 0, steps), first_state)?;
        let output_vocab = hidden.apply(&self.projector);

        Ok(TrainOutput { output_vocab, prior, posterior, responsibilities, mixture_loss })
    }

    /// Greedy decoding from the prior, without gradient tracking.
    pub fn generate(
        &self,
        batch: &InferenceBatch,
        pool: &ReferencePool,
        max_len: i64,
        early_stop: bool,
    ) -> Result<InferenceOutput> {
        check_batch(&[
            ("posts", batch.posts.batch_size()),
            ("keywords", batch.topic.keywords.batch_size()),
            ("topic", batch.topic.topic.size()[0]),
            ("sampled_latents", batch.sampled_latents.size()[0]),
        ])?;
        self.check_latents(&batch.sampled_latents)?;
        let stage = match self.config.inference_topic_scorer {
            InferenceTopicScorer::Keyword => TopicStage::KeywordScorer,
            InferenceTopicScorer::Dedicated => TopicStage::Dedicated,
        };

        tch::no_grad(|| {
            let embed_posts = self.embed(batch.posts.ids(), false);
            let t = self.topic_vector(&batch.topic, pool, false, stage)?;
            let (_, state_posts) = self.post_encoder.encode(&embed_posts, batch.posts.lengths())?;
            let x = state_posts.last_layer();

            let prior = self.latent.prior(&x, &t);
            let z = prior.sample(&batch.sampled_latents)?;

            let first_state = self.prepare_state.forward(&Tensor::cat(&[&z, &x], 1));
            let greedy = self.decoder.greedy(&self.embedding, &self.projector, first_state, max_len, early_stop)?;
            let output_vocab = greedy.hidden.apply(&self.projector);
            Ok(InferenceOutput { output_vocab, tokens: greedy.tokens, prior })
        })
    }

    /// Arg-max mixture component of each example's posterior sample.
    /// `pool` is required when the batch carries topic inputs.
    pub fn predict(&self, batch: &ClusterBatch, pool: Option<&ReferencePool>) -> Result<Vec<usize>> {
        let batch_size = check_batch(&[
            ("posts", batch.posts.batch_size()),
            ("responses", batch.responses.batch_size()),
            ("sampled_latents", batch.sampled_latents.size()[0]),
        ])?;
        self.check_latents(&batch.sampled_latents)?;

        tch::no_grad(|| {
            let embed_posts = self.embed(batch.posts.ids(), false);
            let embed_responses = self.embed(batch.responses.ids(), false);
            let (_, state_posts) = self.post_encoder.encode(&embed_posts, batch.posts.lengths())?;
            let (_, state_responses) = self.response_encoder.encode(&embed_responses, batch.responses.lengths())?;
            let x = state_posts.last_layer();
            let y = state_responses.last_layer();

            let t = match (&batch.topic, pool) {
                (Some(topic), Some(pool)) => {
                    check_batch(&[("posts", batch_size), ("keywords", topic.keywords.batch_size())])?;
                    self.topic_vector(topic, pool, false, TopicStage::Dedicated)?
                }
                (Some(_), None) => {
                    return Err(Error::Precondition(
                        "cluster prediction with topic inputs needs a reference pool".to_string(),
                    ));
                }
                (None, _) => Tensor::zeros(
                    [batch_size, self.config.response_encoder.output_size],
                    (Kind::Float, x.device()),
                ),
            };

            let z = self.latent.posterior(&x, &y, &t).sample(&batch.sampled_latents)?;
            let clusters = Vec::<i64>::try_from(&self.mixture.predict(&z)?)?;
            Ok(clusters.into_iter().map(|c| c as usize).collect())
        })
    }
}
