// ============================================================
// Layer 5 — Evaluators
// ============================================================
// Turn one batch into a loss tensor and a correct-count.
//
//   exact-match      — generative cloze tasks. Loss is the
//                      masked-LM loss; a row counts as correct
//                      when its decoded tokens equal the labels
//                      at every position.
//
//   multiple-choice  — classification. Logits at each predict
//                      position are restricted to the label-map
//                      tokens; loss is the NLL of the gold label
//                      among those candidates.
//
// The returned loss keeps its autodiff graph, so the trainer
// can backpropagate through it directly.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use burn::{prelude::*, tensor::{activation, TensorData}};
use tokenizers::Tokenizer;

use crate::data::{batcher::ModelInputs, templatizer::encode_label};
use crate::domain::strategy::{DecodingStrategy, EvaluationStrategy};
use crate::ml::decoder::decode;
use crate::ml::model::TriggerForward;
use crate::ml::readback::{to_bool_vec, to_i64_vec};

pub struct Evaluation<B: Backend> {
    pub loss:    Tensor<B, 1>,
    pub correct: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluator {
    ExactMatch { strategy: DecodingStrategy },
    /// Candidate token ids, one per label-map entry.
    MultipleChoice { label_tokens: Vec<u32> },
}

impl Evaluator {
    pub fn new(
        strategy:  EvaluationStrategy,
        decoding:  Option<DecodingStrategy>,
        label_map: Option<&BTreeMap<String, String>>,
        tokenizer: &Tokenizer,
    ) -> Result<Self> {
        match strategy {
            EvaluationStrategy::ExactMatch => {
                let strategy = decoding
                    .context("exact-match evaluation requires a decoding strategy")?;
                Ok(Self::ExactMatch { strategy })
            }
            EvaluationStrategy::MultipleChoice => {
                let label_map = label_map
                    .context("multiple-choice evaluation requires a label map")?;
                Self::multiple_choice(label_map, tokenizer)
            }
        }
    }

    pub fn multiple_choice(label_map: &BTreeMap<String, String>, tokenizer: &Tokenizer) -> Result<Self> {
        let mut label_tokens = Vec::with_capacity(label_map.len());
        for verbalizer in label_map.values() {
            let ids = encode_label(tokenizer, verbalizer)?;
            if ids.len() != 1 {
                bail!(
                    "multi-token labels not supported for multiple choice evaluation \
                     ('{verbalizer}' is {} tokens)",
                    ids.len()
                );
            }
            if !label_tokens.contains(&ids[0]) {
                label_tokens.push(ids[0]);
            }
        }
        tracing::debug!("Multiple-choice candidates: {:?}", label_tokens);
        Ok(Self::MultipleChoice { label_tokens })
    }

    pub fn evaluate<B: Backend, M: TriggerForward<B>>(
        &self,
        model:  &M,
        inputs: ModelInputs<B>,
        labels: Tensor<B, 2, Int>,
    ) -> Result<Evaluation<B>> {
        match self {
            Self::ExactMatch { strategy } => exact_match(model, inputs, labels, *strategy),
            Self::MultipleChoice { label_tokens } => multiple_choice(model, &inputs, labels, label_tokens),
        }
    }
}

fn exact_match<B: Backend, M: TriggerForward<B>>(
    model:    &M,
    inputs:   ModelInputs<B>,
    labels:   Tensor<B, 2, Int>,
    strategy: DecodingStrategy,
) -> Result<Evaluation<B>> {
    let loss = model
        .forward_with_triggers(&inputs, Some(labels.clone()))?
        .loss
        .context("Forward pass returned no loss")?;

    let seq_len = inputs.seq_len();
    let decoded = decode(model, inputs, strategy)?;
    let predicted = to_i64_vec(decoded.predictions)?;
    let gold      = to_i64_vec(labels)?;

    let correct = predicted
        .chunks(seq_len.max(1))
        .zip(gold.chunks(seq_len.max(1)))
        .filter(|(p, g)| p == g)
        .count();
    Ok(Evaluation { loss, correct })
}

fn multiple_choice<B: Backend, M: TriggerForward<B>>(
    model:        &M,
    inputs:       &ModelInputs<B>,
    labels:       Tensor<B, 2, Int>,
    label_tokens: &[u32],
) -> Result<Evaluation<B>> {
    let device = inputs.device();
    let logits = model.forward_with_triggers(inputs, None)?.logits;
    let [batch_size, seq_len, vocab] = logits.dims();

    // ── Gather the predict positions on the host ──────────────────────────────
    let predict = to_bool_vec(inputs.predict_mask.clone())?;
    let gold    = to_i64_vec(labels)?;
    let mut positions  = Vec::new();
    let mut gold_index = Vec::new();
    for flat in (0..predict.len()).filter(|&i| predict[i]) {
        let index = label_tokens
            .iter()
            .position(|&t| t as i64 == gold[flat])
            .with_context(|| format!("Gold token {} is not a label-map token", gold[flat]))?;
        positions.push(flat as i64);
        gold_index.push(index as i64);
    }

    if positions.is_empty() {
        return Ok(Evaluation { loss: Tensor::zeros([1], &device), correct: 0 });
    }
    let n = positions.len();

    // ── Restrict logits to the candidate tokens ───────────────────────────────
    let positions = Tensor::<B, 1, Int>::from_data(TensorData::new(positions, [n]), &device);
    let candidates: Vec<i64> = label_tokens.iter().map(|&t| t as i64).collect();
    let candidates = Tensor::<B, 1, Int>::from_data(TensorData::new(candidates, [label_tokens.len()]), &device);
    let restricted = logits
        .reshape([batch_size * seq_len, vocab])
        .select(0, positions)
        .select(1, candidates);

    let predicted = to_i64_vec(restricted.clone().argmax(1).flatten::<1>(0, 1))?;
    let correct = predicted.iter().zip(&gold_index).filter(|(p, g)| p == g).count();

    let targets = Tensor::<B, 2, Int>::from_data(TensorData::new(gold_index, [n, 1]), &device);
    let loss = activation::log_softmax(restricted, 1)
        .gather(1, targets)
        .mean()
        .neg();
    Ok(Evaluation { loss, correct })
}
