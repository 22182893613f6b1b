// src/data.rs

//! Tokenised dialogue records, corpus persistence and batch collation.

use crate::batch::{ReferencePool, Sequences, TopicInputs, TrainBatch};
use crate::error::{Error, Result};
use crate::text_processing::{SpecialIds, TextProcessor};
use arrow::array::{Array, StringArray};
use bincode::config;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    path::Path,
};
use tch::{Device, Kind, Tensor};

/// Raw text of one training example, as read from JSONL or Parquet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDialogue {
    pub post: String,
    pub response: String,
    /// Whitespace-separated keywords.
    pub keywords: String,
    pub topic: String,
}

/// One tokenised example. `response` carries the start and end ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialogue {
    pub post: Vec<i64>,
    pub response: Vec<i64>,
    pub keywords: Vec<i64>,
    pub topic: i64,
}

impl Dialogue {
    /// Returns `None` for examples that would be empty after tokenisation.
    pub fn from_raw(raw: &RawDialogue, processor: &TextProcessor, special: SpecialIds, max_len: usize) -> Result<Option<Self>> {
        let mut post = processor.encode_ids(&raw.post)?;
        let mut body = processor.encode_ids(&raw.response)?;
        let mut keywords = Vec::new();
        for keyword in raw.keywords.split_whitespace() {
            keywords.extend(processor.encode_ids(keyword)?);
        }
        let topic = processor.encode_ids(&raw.topic)?;
        let (Some(&topic), false, false, false) = (topic.first(), post.is_empty(), body.is_empty(), keywords.is_empty())
        else {
            return Ok(None);
        };

        post.truncate(max_len);
        body.truncate(max_len.saturating_sub(2));
        keywords.truncate(max_len);
        let mut response = Vec::with_capacity(body.len() + 2);
        response.push(special.start_id);
        response.extend(body);
        response.push(special.end_id);
        Ok(Some(Self { post, response, keywords, topic }))
    }
}

/// Everything `train` needs: examples plus the reference sentence pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogueCorpus {
    pub dialogues: Vec<Dialogue>,
    pub reference_sentences: Vec<Vec<i64>>,
}

impl DialogueCorpus {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, bincode::serde::encode_to_vec(self, config::standard())?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        let (corpus, _) = bincode::serde::decode_from_slice(&bytes, config::standard())?;
        Ok(corpus)
    }

    pub fn reference_pool(&self, pad_id: i64, device: Device) -> Result<ReferencePool> {
        if self.reference_sentences.is_empty() {
            return Err(Error::Precondition("the reference pool is empty".to_string()));
        }
        Ok(ReferencePool { sentences: Sequences::from_rows(&self.reference_sentences, pad_id, device)? })
    }
}

/// Reads raw dialogues from a JSONL file, one JSON object per line.
pub fn read_jsonl<P: AsRef<Path>>(path: P) -> Result<Vec<RawDialogue>> {
    fs::read_to_string(path)?
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

const COLUMNS: [&str; 4] = ["post", "response", "keywords", "topic"];

/// Reads raw dialogues from the string columns `post`, `response`,
/// `keywords` and `topic` of a Parquet file. Rows with a null cell are skipped.
pub fn read_parquet<P: AsRef<Path>>(path: P) -> Result<Vec<RawDialogue>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    for name in COLUMNS {
        if builder.schema().field_with_name(name).is_err() {
            return Err(Error::Precondition(format!("parquet file must contain a column named '{name}'")));
        }
    }

    let mut dialogues = Vec::new();
    for record_batch in builder.build()? {
        let record_batch = record_batch?;
        let mut columns = Vec::with_capacity(COLUMNS.len());
        for name in COLUMNS {
            let column = record_batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| Error::Precondition(format!("column '{name}' must hold strings")))?;
            columns.push(column);
        }
        for row in 0..record_batch.num_rows() {
            if columns.iter().any(|c| c.is_null(row)) {
                continue;
            }
            dialogues.push(RawDialogue {
                post: columns[0].value(row).to_string(),
                response: columns[1].value(row).to_string(),
                keywords: columns[2].value(row).to_string(),
                topic: columns[3].value(row).to_string(),
            });
        }
    }
    Ok(dialogues)
}

/// Dispatches on the file extension: `.jsonl`/`.json` or `.parquet`.
pub fn read_raw<P: AsRef<Path>>(path: P) -> Result<Vec<RawDialogue>> {
    let extension = path.as_ref().extension().and_then(|s| s.to_str()).unwrap_or("");
    match extension {
        "jsonl" | "json" => read_jsonl(path),
        "parquet" => read_parquet(path),
        _ => Err(Error::Precondition(format!(
            "unsupported file type '{extension}', use .jsonl or .parquet"
        ))),
    }
}

/// Reads one reference sentence per non-empty line.
pub fn read_sentences<P: AsRef<Path>>(path: P, processor: &TextProcessor, max_len: usize) -> Result<Vec<Vec<i64>>> {
    let mut sentences = Vec::new();
    for line in fs::read_to_string(path)?.lines() {
        let mut ids = processor.encode_ids(line)?;
        if ids.is_empty() {
            continue;
        }
        ids.truncate(max_len);
        sentences.push(ids);
    }
    Ok(sentences)
}

/// Pads `dialogues` into a training batch with fresh `N(0, I)` latent noise.
pub fn collate(dialogues: &[Dialogue], pad_id: i64, latent_size: i64, device: Device) -> Result<TrainBatch> {
    if dialogues.is_empty() {
        return Err(Error::Precondition("cannot collate an empty batch".to_string()));
    }
    let posts: Vec<Vec<i64>> = dialogues.iter().map(|d| d.post.clone()).collect();
    let responses: Vec<Vec<i64>> = dialogues.iter().map(|d| d.response.clone()).collect();
    let keywords: Vec<Vec<i64>> = dialogues.iter().map(|d| d.keywords.clone()).collect();
    let topics: Vec<i64> = dialogues.iter().map(|d| d.topic).collect();
    let batch_size = dialogues.len() as i64;
    Ok(TrainBatch {
        posts: Sequences::from_rows(&posts, pad_id, device)?,
        responses: Sequences::from_rows(&responses, pad_id, device)?,
        topic: TopicInputs {
            keywords: Sequences::from_rows(&keywords, pad_id, device)?,
            topic: Tensor::from_slice(&topics).view([batch_size, 1]).to_device(device),
        },
        sampled_latents: Tensor::randn([batch_size, latent_size], (Kind::Float, device)),
    })
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::text_processing::tests::word_level;

    const SPECIAL: SpecialIds = SpecialIds { pad_id: 0, start_id: 1, end_id: 2 };

    fn raw() -> RawDialogue {
        RawDialogue {
            post: "how are you".to_string(),
            response: "hello world".to_string(),
            keywords: "weather  rain".to_string(),
            topic: "chat".to_string(),
        }
    }

    #[test]
    fn responses_are_wrapped_in_start_and_end_ids() {
        let dialogue = Dialogue::from_raw(&raw(), &word_level(), SPECIAL, 10).unwrap().unwrap();
        assert_eq!(dialogue.post, vec![6, 7, 8]);
        assert_eq!(dialogue.response, vec![1, 4, 5, 2]);
        assert_eq!(dialogue.keywords, vec![9, 10]);
        assert_eq!(dialogue.topic, 11);
    }

    #[test]
    fn empty_fields_skip_the_record() {
        let processor = word_level();
        let blank: [fn(&mut RawDialogue); 4] = [
            |r| r.post.clear(),
            |r| r.response.clear(),
            |r| r.keywords = "   ".to_string(),
            |r| r.topic.clear(),
        ];
        for clear in blank {
            let mut record = raw();
            clear(&mut record);
            assert_eq!(Dialogue::from_raw(&record, &processor, SPECIAL, 10).unwrap(), None);
        }
    }

    #[test]
    fn truncation_keeps_room_for_the_end_ids() {
        let dialogue = Dialogue::from_raw(&raw(), &word_level(), SPECIAL, 3).unwrap().unwrap();
        assert_eq!(dialogue.response, vec![1, 4, 2]);
        assert_eq!(dialogue.post, vec![6, 7, 8]);
        assert_eq!(dialogue.keywords, vec![9, 10]);
    }

    fn dialogue(seed: i64) -> Dialogue {
        Dialogue {
            post: vec![seed; (seed as usize % 3) + 1],
            response: vec![1, seed, seed + 1, 2],
            keywords: vec![seed + 2; 2],
            topic: seed + 3,
        }
    }

    #[test]
    fn corpus_survives_bincode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.bin");
        let corpus = DialogueCorpus {
            dialogues: (3..8).map(dialogue).collect(),
            reference_sentences: vec![vec![4, 5, 6], vec![7]],
        };
        corpus.save(&path).unwrap();
        assert_eq!(DialogueCorpus::load(&path).unwrap(), corpus);
    }

    #[test]
    fn collation_pads_and_samples_noise() {
        let dialogues: Vec<Dialogue> = (3..6).map(dialogue).collect();
        let batch = collate(&dialogues, 0, 8, Device::Cpu).unwrap();
        assert_eq!(batch.posts.ids().size(), [3, 3]);
        assert_eq!(Vec::<i64>::try_from(batch.posts.lengths()).unwrap(), vec![1, 2, 3]);
        assert_eq!(batch.responses.ids().size(), [3, 4]);
        assert_eq!(batch.topic.topic.size(), [3, 1]);
        assert_eq!(batch.sampled_latents.size(), [3, 8]);
    }

    #[test]
    fn empty_inputs_are_preconditions() {
        assert!(collate(&[], 0, 8, Device::Cpu).is_err());
        assert!(DialogueCorpus::default().reference_pool(0, Device::Cpu).is_err());
    }

    #[test]
    fn jsonl_lines_become_raw_dialogues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.jsonl");
        fs::write(
            &path,
            "{\"post\":\"hi\",\"response\":\"hello\",\"keywords\":\"greeting hello\",\"topic\":\"chat\"}\n\n",
        )
        .unwrap();
        let raw = read_jsonl(&path).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].keywords, "greeting hello");
    }

    #[test]
    fn parquet_rows_with_nulls_are_skipped() {
        use arrow::array::ArrayRef;
        use arrow::datatypes::{DataType, Field, Schema};
        use arrow::record_batch::RecordBatch;
        use parquet::arrow::ArrowWriter;
        use std::sync::Arc;

        let schema = Arc::new(Schema::new(
            COLUMNS.iter().map(|name| Field::new(*name, DataType::Utf8, true)).collect::<Vec<_>>(),
        ));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec![Some("hi"), Some("how are you")])),
            Arc::new(StringArray::from(vec![Some("hello"), None])),
            Arc::new(StringArray::from(vec![Some("greeting"), Some("health")])),
            Arc::new(StringArray::from(vec![Some("chat"), Some("chat")])),
        ];
        let record_batch = RecordBatch::try_new(schema.clone(), columns).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.parquet");
        let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema, None).unwrap();
        writer.write(&record_batch).unwrap();
        writer.close().unwrap();

        let raw = read_raw(&path).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].response, "hello");
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        assert!(matches!(read_raw("corpus.csv"), Err(Error::Precondition(_))));
    }
}
