// ============================================================
// Layer 5 — Masked-Position Decoder
// ============================================================
// Fills every predict slot of a batch with a token id.
//
//   parallel   — one forward pass, argmax at every slot at once
//   monotonic  — one slot per pass, left to right (row-major),
//                later passes see the tokens already committed
//   iterative  — one slot per pass, the most confident slot
//                in the whole batch first
//
// A step commits a single (row, position) pair, so the number of
// forward passes for the sequential strategies equals the number
// of predict slots in the batch.
//
// The bundle is consumed; the committed tokens are written into
// the returned copy and their predict-mask entries cleared.

use anyhow::{ensure, Result};
use burn::{prelude::*, tensor::TensorData};

use crate::data::{batcher::ModelInputs, templatizer::IGNORE_INDEX};
use crate::domain::strategy::DecodingStrategy;
use crate::ml::model::TriggerForward;
use crate::ml::readback::{to_bool_vec, to_f32_vec, to_i64_vec};

pub struct Decoded<B: Backend> {
    /// [batch, seq]; a token id at every originally open predict
    /// position, IGNORE_INDEX everywhere else
    pub predictions: Tensor<B, 2, Int>,

    /// The bundle after decoding (committed tokens written in)
    pub inputs: ModelInputs<B>,
}

/// Host mirror of the two fields decoding mutates.
struct DecodeState {
    batch_size: usize,
    seq_len:    usize,
    ids:        Vec<i64>,
    open:       Vec<bool>,
    output:     Vec<i64>,
}

impl DecodeState {
    fn read<B: Backend>(inputs: &ModelInputs<B>) -> Result<Self> {
        let ids  = to_i64_vec(inputs.input_ids.clone())?;
        let open = to_bool_vec(inputs.predict_mask.clone())?;
        Ok(Self {
            batch_size: inputs.batch_size(),
            seq_len:    inputs.seq_len(),
            output:     vec![IGNORE_INDEX; ids.len()],
            ids,
            open,
        })
    }

    fn open_count(&self) -> usize {
        self.open.iter().filter(|&&o| o).count()
    }

    fn commit(&mut self, flat: usize, token: i64) {
        self.ids[flat]    = token;
        self.output[flat] = token;
        self.open[flat]   = false;
    }

    /// Write the host state back into the bundle.
    fn sync<B: Backend>(&self, inputs: ModelInputs<B>) -> ModelInputs<B> {
        let shape  = [self.batch_size, self.seq_len];
        let device = inputs.device();
        ModelInputs {
            input_ids:    Tensor::from_data(TensorData::new(self.ids.clone(), shape), &device),
            predict_mask: Tensor::from_data(TensorData::new(self.open.clone(), shape), &device),
            ..inputs
        }
    }

    fn predictions<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2, Int> {
        Tensor::from_data(
            TensorData::new(self.output.clone(), [self.batch_size, self.seq_len]),
            device,
        )
    }
}

pub fn decode<B: Backend, M: TriggerForward<B>>(
    model:    &M,
    inputs:   ModelInputs<B>,
    strategy: DecodingStrategy,
) -> Result<Decoded<B>> {
    let mut state = DecodeState::read(&inputs)?;
    let device    = inputs.device();
    let steps     = state.open_count();

    if steps == 0 {
        tracing::debug!("No predict positions in batch; skipping decode");
        return Ok(Decoded { predictions: state.predictions(&device), inputs });
    }

    let inputs = match strategy {
        DecodingStrategy::Parallel => {
            let logits = model.forward_with_triggers(&inputs, None)?.logits;
            let tokens = to_i64_vec(logits.argmax(2).flatten::<2>(1, 2))?;
            for flat in 0..state.open.len() {
                if state.open[flat] {
                    state.output[flat] = tokens[flat];
                }
            }
            inputs
        }
        DecodingStrategy::Monotonic | DecodingStrategy::Iterative => {
            let mut inputs = inputs;
            for step in 0..steps {
                let logits = model.forward_with_triggers(&inputs, None)?.logits;
                let tokens = to_i64_vec(logits.clone().argmax(2).flatten::<2>(1, 2))?;

                let flat = match strategy {
                    DecodingStrategy::Iterative => {
                        let best = to_f32_vec(logits.max_dim(2).flatten::<2>(1, 2))?;
                        most_confident(&best, &state.open)
                    }
                    _ => state.open.iter().position(|&o| o),
                };
                let Some(flat) = flat else { break };

                state.commit(flat, tokens[flat]);
                tracing::trace!(
                    step,
                    row = flat / state.seq_len,
                    position = flat % state.seq_len,
                    token = tokens[flat],
                    "Committed predict slot"
                );
                inputs = state.sync(inputs);
            }
            inputs
        }
    };

    ensure!(
        state.open_count() == 0 || strategy == DecodingStrategy::Parallel,
        "Decoder left {} predict positions open",
        state.open_count()
    );
    Ok(Decoded { predictions: state.predictions(&device), inputs })
}

/// Index of the open position whose best logit is highest. Closed
/// positions are never candidates, however low the open scores go.
/// Ties go to the first index.
fn most_confident(best: &[f32], open: &[bool]) -> Option<usize> {
    let mut winner: Option<(usize, f32)> = None;
    for (flat, &score) in best.iter().enumerate().filter(|&(flat, _)| open[flat]) {
        match winner {
            Some((_, top)) if score <= top => {}
            _ => winner = Some((flat, score)),
        }
    }
    winner.map(|(flat, _)| flat)
}
