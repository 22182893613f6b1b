// src/batch.rs

//! Typed inputs to the model's forward calls.

use crate::error::{shape, Result};
use tch::{Device, Kind, Tensor};

/// Right-padded token ids `[batch, time]` with their valid lengths `[batch]`.
#[derive(Debug)]
pub struct Sequences {
    ids: Tensor,
    lengths: Tensor,
}

impl Sequences {
    pub fn new(ids: Tensor, lengths: Tensor) -> Result<Self> {
        let (batch_size, time) = ids.size2()?;
        if lengths.size() != [batch_size] {
            return Err(shape(format!(
                "lengths {:?} do not match ids {:?}",
                lengths.size(),
                ids.size()
            )));
        }
        if batch_size > 0 {
            let longest = lengths.max().int64_value(&[]);
            let shortest = lengths.min().int64_value(&[]);
            if shortest < 0 || longest > time {
                return Err(shape(format!("lengths must lie in [0, {time}], got [{shortest}, {longest}]")));
            }
        }
        Ok(Self { ids: ids.to_kind(Kind::Int64), lengths: lengths.to_kind(Kind::Int64) })
    }

    /// Pads `rows` with `pad_id` to the longest row.
    pub fn from_rows(rows: &[Vec<i64>], pad_id: i64, device: Device) -> Result<Self> {
        let time = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut flat = Vec::with_capacity(rows.len() * time);
        for row in rows {
            flat.extend_from_slice(row);
            flat.extend(std::iter::repeat(pad_id).take(time - row.len()));
        }
        let lengths: Vec<i64> = rows.iter().map(|row| row.len() as i64).collect();
        let ids = Tensor::from_slice(&flat).view([rows.len() as i64, time as i64]).to_device(device);
        Self::new(ids, Tensor::from_slice(&lengths).to_device(device))
    }

    pub fn ids(&self) -> &Tensor {
        &self.ids
    }

    pub fn lengths(&self) -> &Tensor {
        &self.lengths
    }

    pub fn batch_size(&self) -> i64 {
        self.ids.size()[0]
    }

    pub fn time(&self) -> i64 {
        self.ids.size()[1]
    }

    pub fn to_device(&self, device: Device) -> Self {
        Self { ids: self.ids.to_device(device), lengths: self.lengths.to_device(device) }
    }
}

/// Corpus-level reference sentences shared by every example of a batch.
#[derive(Debug)]
pub struct ReferencePool {
    pub sentences: Sequences,
}

/// Keywords `[batch, n]` and a single topic token `[batch, 1]` per example.
#[derive(Debug)]
pub struct TopicInputs {
    pub keywords: Sequences,
    pub topic: Tensor,
}

#[derive(Debug)]
pub struct TrainBatch {
    pub posts: Sequences,
    pub responses: Sequences,
    pub topic: TopicInputs,
    /// Standard-normal noise `[batch, latent]` used for reparameterisation.
    pub sampled_latents: Tensor,
}

#[derive(Debug)]
pub struct InferenceBatch {
    pub posts: Sequences,
    pub topic: TopicInputs,
    pub sampled_latents: Tensor,
}

#[derive(Debug)]
pub struct ClusterBatch {
    pub posts: Sequences,
    pub responses: Sequences,
    pub sampled_latents: Tensor,
    /// Without topic inputs the topic vector is taken to be zero.
    pub topic: Option<TopicInputs>,
}

/// Fails unless every named batch size equals the first.
pub(crate) fn check_batch(sizes: &[(&str, i64)]) -> Result<i64> {
    let Some(&(first_name, batch_size)) = sizes.first() else {
        return Err(shape("no inputs to check"));
    };
    for &(name, size) in &sizes[1..] {
        if size != batch_size {
            return Err(shape(format!(
                "{name} has batch size {size} but {first_name} has {batch_size}"
            )));
        }
    }
    Ok(batch_size)
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_right_padded() {
        let seqs = Sequences::from_rows(&[vec![5, 6, 7], vec![8]], 0, Device::Cpu).unwrap();
        assert_eq!(seqs.ids().size(), [2, 3]);
        assert_eq!(Vec::<i64>::try_from(&seqs.ids().view([-1])).unwrap(), vec![5, 6, 7, 8, 0, 0]);
        assert_eq!(Vec::<i64>::try_from(seqs.lengths()).unwrap(), vec![3, 1]);
    }

    #[test]
    fn lengths_beyond_capacity_are_rejected() {
        let ids = Tensor::zeros([2, 3], (Kind::Int64, Device::Cpu));
        assert!(Sequences::new(ids, Tensor::from_slice(&[3i64, 4])).is_err());
    }

    #[test]
    fn batch_sizes_must_agree() {
        assert_eq!(check_batch(&[("posts", 2), ("responses", 2)]).unwrap(), 2);
        let err = check_batch(&[("posts", 2), ("topic", 3)]).unwrap_err();
        assert!(err.to_string().contains("topic"));
    }
}
