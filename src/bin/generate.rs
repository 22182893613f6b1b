// src/bin/generate.rs

use anyhow::{Result, bail};
use clap::Parser;
use env_logger::Env;
use log::info;
use std::path::PathBuf;
use tch::{Device, Kind, Tensor, nn};
use topicvae::{
    DialogueModel, InferenceBatch, ModelConfig, Sequences, TopicInputs, checkpoint,
    data::DialogueCorpus, text_processing::TextProcessor,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
/// Generates a response to one post by greedy decoding from the prior.
struct GenerateArgs {
    /// Tokenizer file (`tokenizer.json`)
    #[arg(long, short)]
    tokenizer: String,

    /// Model configuration written by `train`
    #[arg(long, short)]
    config: PathBuf,

    /// Checkpoint to load
    #[arg(long, short)]
    model: PathBuf,

    /// Corpus whose reference sentences condition the topic context
    #[arg(long)]
    corpus: String,

    /// Whitespace-separated keywords
    #[arg(long, short)]
    keywords: String,

    /// Topic word
    #[arg(long)]
    topic: String,

    /// The post to respond to
    post: String,

    /// Decode exactly `max_len` steps instead of stopping at the end token
    #[arg(long)]
    no_early_stop: bool,

    /// Overrides the configured maximum response length
    #[arg(long)]
    max_len: Option<i64>,

    /// Decode on the first CUDA device if available
    #[arg(long)]
    cuda: bool,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = GenerateArgs::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(if args.verbose { "debug" } else { "info" })).init();
    let device = if args.cuda { Device::cuda_if_available() } else { Device::Cpu };

    // --- 1. Setup ---
    let processor = TextProcessor::new(&args.tokenizer)?;
    let config = ModelConfig::from_json_file(&args.config)?;
    let pool = DialogueCorpus::load(&args.corpus)?.reference_pool(config.pad_id, device)?;

    let post = processor.encode_ids(&args.post)?;
    let mut keywords = Vec::new();
    for keyword in args.keywords.split_whitespace() {
        keywords.extend(processor.encode_ids(keyword)?);
    }
    let Some(&topic) = processor.encode_ids(&args.topic)?.first() else {
        bail!("topic {:?} does not tokenise", args.topic);
    };
    if post.is_empty() || keywords.is_empty() {
        bail!("post and keywords must contain at least one token");
    }

    // --- 2. Load the Trained Model ---
    let mut vs = nn::VarStore::new(device);
    let model = DialogueModel::new(&vs, &config)?;
    let restored = checkpoint::load(&mut vs, &args.model)?;
    info!("model {:?} loaded (epoch {}, step {})", args.model, restored.epoch, restored.global_step);

    // --- 3. Greedy Decoding ---
    let batch = InferenceBatch {
        posts: Sequences::from_rows(&[post], config.pad_id, device)?,
        topic: TopicInputs {
            keywords: Sequences::from_rows(&[keywords], config.pad_id, device)?,
            topic: Tensor::from_slice(&[topic]).view([1, 1]).to_device(device),
        },
        sampled_latents: Tensor::randn([1, config.latent_size], (Kind::Float, device)),
    };
    let max_len = args.max_len.unwrap_or(config.max_decode_len);
    let output = model.generate(&batch, &pool, max_len, !args.no_early_stop)?;

    let tokens = Vec::<i64>::try_from(output.tokens.get(0).to_device(Device::Cpu))?;
    let response = processor.decode(TextProcessor::strip_response(&tokens, config.end_id))?;
    println!("{response}");
    Ok(())
}
