// src/bin/process_data.rs

use anyhow::{Result, bail};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use std::time::Instant;
use topicvae::{
    data::{self, Dialogue, DialogueCorpus},
    text_processing::TextProcessor,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
/// Tokenises raw dialogues and reference sentences into a bincode corpus.
struct ProcessArgs {
    /// Tokenizer file (`tokenizer.json`)
    #[arg(long, short)]
    tokenizer: String,

    /// Raw dialogue files, `.jsonl` or `.parquet`
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Reference sentences, one per line
    #[arg(long, short)]
    references: String,

    /// Output corpus file
    #[arg(long, short)]
    out: String,

    /// Truncate every sequence to this many tokens
    #[arg(long, default_value_t = 60)]
    max_len: usize,

    #[arg(long, default_value = "[PAD]")]
    pad_token: String,

    #[arg(long, default_value = "[CLS]")]
    start_token: String,

    #[arg(long, default_value = "[SEP]")]
    end_token: String,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = ProcessArgs::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(if args.verbose { "debug" } else { "info" })).init();

    info!("loading tokenizer from {}", args.tokenizer);
    let processor = TextProcessor::new(&args.tokenizer)?;
    let special = processor.special_ids(&args.pad_token, &args.start_token, &args.end_token)?;
    info!("vocabulary of {} tokens, special ids {special:?}", processor.vocab_size());

    let start_time = Instant::now();
    let mut corpus = DialogueCorpus::default();
    for input in &args.inputs {
        let raw = data::read_raw(input)?;
        let mut skipped = 0;
        for dialogue in &raw {
            match Dialogue::from_raw(dialogue, &processor, special, args.max_len)? {
                Some(dialogue) => corpus.dialogues.push(dialogue),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!("{input}: skipped {skipped} of {} dialogues with empty fields", raw.len());
        }
        info!("{input}: {} dialogues read", raw.len());
    }
    corpus.reference_sentences = data::read_sentences(&args.references, &processor, args.max_len)?;

    if corpus.dialogues.is_empty() {
        bail!("no usable dialogues in {:?}", args.inputs);
    }
    if corpus.reference_sentences.is_empty() {
        bail!("no reference sentences in {}", args.references);
    }
    info!(
        "processed {} dialogues and {} reference sentences in {:?}",
        corpus.dialogues.len(),
        corpus.reference_sentences.len(),
        start_time.elapsed()
    );

    corpus.save(&args.out)?;
    info!("corpus saved to {}", args.out);
    Ok(())
}
