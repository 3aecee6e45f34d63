// ============================================================
// Layer 4 — Trigger Batcher (collator)
// ============================================================
// Implements Burn's Batcher trait to convert a
// Vec<TemplatizedInstance> into device tensors.
//
// Templatized instances have different lengths, so every
// field is right-padded to the longest instance in the batch:
//
//   input_ids       → pad token id
//   token_type_ids  → 0
//   attention_mask  → 0 (ignore this position)
//   trigger_mask    → false
//   predict_mask    → false
//   labels          → -100 (ignored by the loss)
//
// Then each field is flattened row-major and reshaped to
// [batch_size, seq_len].
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::templatizer::{TemplatizedInstance, IGNORE_INDEX};

// ─── ModelInputs ──────────────────────────────────────────────────────────────
/// The model input bundle: everything the trigger-augmented forward
/// pass needs for one batch. All tensors are [batch_size, seq_len].
#[derive(Debug, Clone)]
pub struct ModelInputs<B: Backend> {
    /// Token ids; trigger and predict slots hold the mask id
    pub input_ids: Tensor<B, 2, Int>,

    /// Segment ids (all zero for single-segment templates)
    pub token_type_ids: Tensor<B, 2, Int>,

    /// 1 = real token, 0 = padding
    pub attention_mask: Tensor<B, 2, Int>,

    /// true where a learned trigger vector replaces the embedding
    pub trigger_mask: Tensor<B, 2, Bool>,

    /// true where the model must predict a token
    pub predict_mask: Tensor<B, 2, Bool>,
}

impl<B: Backend> ModelInputs<B> {
    pub fn batch_size(&self) -> usize {
        self.input_ids.dims()[0]
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.dims()[1]
    }

    pub fn device(&self) -> B::Device {
        self.input_ids.device()
    }
}

// ─── TriggerBatch ─────────────────────────────────────────────────────────────
/// A collated batch: the input bundle plus aligned labels.
#[derive(Debug, Clone)]
pub struct TriggerBatch<B: Backend> {
    pub inputs: ModelInputs<B>,

    /// [batch_size, seq_len]; -100 outside predict positions
    pub labels: Tensor<B, 2, Int>,
}

impl<B: Backend> TriggerBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.inputs.batch_size()
    }
}

// ─── TriggerBatcher ───────────────────────────────────────────────────────────
/// Holds the target device and the id used to pad token sequences.
#[derive(Clone, Debug)]
pub struct TriggerBatcher<B: Backend> {
    pub device: B::Device,
    pub pad_token_id: u32,
}

impl<B: Backend> TriggerBatcher<B> {
    pub fn new(device: B::Device, pad_token_id: u32) -> Self {
        Self { device, pad_token_id }
    }
}

impl<B: Backend> Batcher<TemplatizedInstance, TriggerBatch<B>> for TriggerBatcher<B> {
    fn batch(&self, items: Vec<TemplatizedInstance>) -> TriggerBatch<B> {
        let batch_size = items.len();
        let seq_len    = items.iter().map(TemplatizedInstance::len).max().unwrap_or(0);
        let total      = batch_size * seq_len;

        let mut ids      = Vec::with_capacity(total);
        let mut types    = Vec::with_capacity(total);
        let mut attn     = Vec::with_capacity(total);
        let mut triggers = Vec::with_capacity(total);
        let mut predicts = Vec::with_capacity(total);
        let mut labels   = Vec::with_capacity(total);

        for item in &items {
            let pad = seq_len - item.len();

            ids.extend(item.input_ids.iter().map(|&x| x as i64));
            ids.extend(std::iter::repeat(self.pad_token_id as i64).take(pad));

            types.extend(item.token_type_ids.iter().map(|&x| x as i64));
            types.extend(std::iter::repeat(0i64).take(pad));

            attn.extend(std::iter::repeat(1i64).take(item.len()));
            attn.extend(std::iter::repeat(0i64).take(pad));

            triggers.extend_from_slice(&item.trigger_mask);
            triggers.extend(std::iter::repeat(false).take(pad));

            predicts.extend_from_slice(&item.predict_mask);
            predicts.extend(std::iter::repeat(false).take(pad));

            labels.extend_from_slice(&item.labels);
            labels.extend(std::iter::repeat(IGNORE_INDEX).take(pad));
        }

        let shape  = [batch_size, seq_len];
        let device = &self.device;
        let int_tensor  = |v: Vec<i64>|  Tensor::<B, 2, Int>::from_data(TensorData::new(v, shape), device);
        let bool_tensor = |v: Vec<bool>| Tensor::<B, 2, Bool>::from_data(TensorData::new(v, shape), device);

        TriggerBatch {
            inputs: ModelInputs {
                input_ids:      int_tensor(ids),
                token_type_ids: int_tensor(types),
                attention_mask: int_tensor(attn),
                trigger_mask:   bool_tensor(triggers),
                predict_mask:   bool_tensor(predicts),
            },
            labels: int_tensor(labels),
        }
    }
}
