// src/text_processing.rs

//! This module bridges raw dialogue text and token ids.
//! It wraps a HuggingFace tokenizer and resolves the special ids the model needs.

use crate::error::{Error, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tokenizers::tokenizer::Tokenizer;

/// Collapses runs of whitespace and trims the ends.
pub fn clean_text(text: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let whitespace = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
    whitespace.replace_all(text.trim(), " ").into_owned()
}

/// Special tokens marking padding and the ends of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialIds {
    pub pad_id: i64,
    pub start_id: i64,
    pub end_id: i64,
}

/// `TextProcessor` converts dialogue text to and from token ids.
pub struct TextProcessor {
    pub tokenizer: Tokenizer,
}

impl TextProcessor {
    /// Creates a new processor from a local tokenizer file.
    pub fn new<P: AsRef<Path>>(tokenizer_path: P) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path.as_ref()).map_err(|e| {
            Error::Tokenizer(format!("failed to load tokenizer from {:?}: {e}", tokenizer_path.as_ref()))
        })?;
        Ok(Self { tokenizer })
    }

    /// Encodes cleaned text into ids, without special tokens.
    pub fn encode_ids(&self, text: &str) -> Result<Vec<i64>> {
        let encoding = self
            .tokenizer
            .encode(clean_text(text), false)
            .map_err(|e| Error::Tokenizer(format!("failed to encode text: {e}")))?;
        Ok(encoding.get_ids().iter().map(|&id| id as i64).collect())
    }

    /// Decodes ids back into a string, skipping special tokens.
    pub fn decode(&self, ids: &[i64]) -> Result<String> {
        let ids: Vec<u32> = ids.iter().map(|&id| id as u32).collect();
        self.tokenizer
            .decode(&ids, true)
            .map_err(|e| Error::Tokenizer(format!("failed to decode ids: {e}")))
    }

    /// Exposes the tokenizer's vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn token_id(&self, token: &str) -> Result<i64> {
        self.tokenizer
            .token_to_id(token)
            .map(i64::from)
            .ok_or_else(|| Error::Tokenizer(format!("token {token:?} is not in the vocabulary")))
    }

    /// Looks up pad/start/end ids, e.g. `[PAD]`, `[CLS]`, `[SEP]` for BERT vocabularies.
    pub fn special_ids(&self, pad: &str, start: &str, end: &str) -> Result<SpecialIds> {
        Ok(SpecialIds { pad_id: self.token_id(pad)?, start_id: self.token_id(start)?, end_id: self.token_id(end)? })
    }

    /// Truncates a decoded response at its first end token.
    pub fn strip_response(ids: &[i64], end_id: i64) -> &[i64] {
        match ids.iter().position(|&id| id == end_id) {
            Some(end) => &ids[..end],
            None => ids,
        }
    }
}

// --- Tests ---
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::str::FromStr;

    pub(crate) const WORDS: [&str; 12] =
        ["[PAD]", "[CLS]", "[SEP]", "[UNK]", "hello", "world", "how", "are", "you", "weather", "rain", "chat"];

    /// Word-level tokenizer over `WORDS`, split on whitespace; ids follow positions.
    pub(crate) fn word_level() -> TextProcessor {
        let vocab = WORDS
            .iter()
            .enumerate()
            .map(|(id, word)| format!("\"{word}\": {id}"))
            .collect::<Vec<_>>()
            .join(", ");
        let json = format!(
            r#"{{
                "version": "1.0",
                "truncation": null,
                "padding": null,
                "added_tokens": [],
                "normalizer": null,
                "pre_tokenizer": {{ "type": "Whitespace" }},
                "post_processor": null,
                "decoder": null,
                "model": {{ "type": "WordLevel", "vocab": {{ {vocab} }}, "unk_token": "[UNK]" }}
            }}"#
        );
        TextProcessor { tokenizer: Tokenizer::from_str(&json).unwrap() }
    }

    #[test]
    fn text_round_trips_through_ids() {
        let processor = word_level();
        let ids = processor.encode_ids("  hello \n world ").unwrap();
        assert_eq!(ids, vec![4, 5]);
        assert_eq!(processor.decode(&ids).unwrap(), "hello world");
        assert_eq!(processor.encode_ids("goodbye").unwrap(), vec![3]);
        assert!(processor.encode_ids("").unwrap().is_empty());
        assert_eq!(processor.vocab_size(), WORDS.len());
    }

    #[test]
    fn special_ids_are_looked_up_by_token() {
        let processor = word_level();
        let special = processor.special_ids("[PAD]", "[CLS]", "[SEP]").unwrap();
        assert_eq!(special, SpecialIds { pad_id: 0, start_id: 1, end_id: 2 });
        assert!(matches!(processor.special_ids("[PAD]", "[BOS]", "[SEP]"), Err(Error::Tokenizer(_))));
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(clean_text("  hello \n\t world  "), "hello world");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn responses_end_at_the_first_end_token() {
        assert_eq!(TextProcessor::strip_response(&[5, 6, 2, 7, 2], 2), &[5, 6]);
        assert_eq!(TextProcessor::strip_response(&[5, 6], 2), &[5, 6]);
    }
}
