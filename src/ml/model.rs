use anyhow::{ensure, Result};
use burn::{
    module::Param,
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::{activation, Distribution, TensorData},
};

use crate::data::{batcher::ModelInputs, templatizer::IGNORE_INDEX};
use crate::ml::readback::to_bool_vec;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct MlmEncoderConfig {
    pub vocab_size: usize,
    #[config(default = 512)]
    pub max_position_embeddings: usize,
    #[config(default = 2)]
    pub type_vocab_size: usize,
    #[config(default = 256)]
    pub d_model: usize,
    #[config(default = 8)]
    pub num_heads: usize,
    #[config(default = 6)]
    pub num_layers: usize,
    #[config(default = 1024)]
    pub d_ff: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl MlmEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MlmEncoder<B> {
        let word_embedding       = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let position_embedding   = EmbeddingConfig::new(self.max_position_embeddings, self.d_model).init(device);
        let token_type_embedding = EmbeddingConfig::new(self.type_vocab_size, self.d_model).init(device);
        let embedding_norm       = LayerNormConfig::new(self.d_model).init(device);
        let layers: Vec<EncoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();
        let lm_head = MlmHead {
            dense:   LinearConfig::new(self.d_model, self.d_model).init(device),
            norm:    LayerNormConfig::new(self.d_model).init(device),
            decoder: LinearConfig::new(self.d_model, self.vocab_size).init(device),
        };
        let dropout = DropoutConfig::new(self.dropout).init();
        MlmEncoder {
            word_embedding, position_embedding, token_type_embedding, embedding_norm,
            layers, lm_head, dropout,
            max_position_embeddings: self.max_position_embeddings,
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// `pad_mask` is true at padding positions, which no query may attend to.
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let input = MhaInput::self_attn(x.clone()).mask_pad(pad_mask);
        let attn_output = self.self_attn.forward(input).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(
            activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

/// Masked-LM prediction head: dense → GELU → LayerNorm → vocabulary.
#[derive(Module, Debug)]
pub struct MlmHead<B: Backend> {
    pub dense:   Linear<B>,
    pub norm:    LayerNorm<B>,
    pub decoder: Linear<B>,
}

impl<B: Backend> MlmHead<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.norm.forward(activation::gelu(self.dense.forward(x)));
        self.decoder.forward(x)
    }
}

/// The underlying masked language model.
#[derive(Module, Debug)]
pub struct MlmEncoder<B: Backend> {
    pub word_embedding:          Embedding<B>,
    pub position_embedding:      Embedding<B>,
    pub token_type_embedding:    Embedding<B>,
    pub embedding_norm:          LayerNorm<B>,
    pub layers:                  Vec<EncoderBlock<B>>,
    pub lm_head:                 MlmHead<B>,
    pub dropout:                 Dropout,
    pub max_position_embeddings: usize,
}

impl<B: Backend> MlmEncoder<B> {
    /// Word embeddings only: input_ids [batch, seq] → [batch, seq, d_model]
    pub fn embeds(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        self.word_embedding.forward(input_ids)
    }

    pub fn hidden_size(&self) -> usize {
        self.word_embedding.weight.dims()[1]
    }

    /// Run the encoder on precomputed word embeddings.
    /// Returns vocabulary logits [batch, seq, vocab].
    pub fn forward_embeds(
        &self,
        inputs_embeds:  Tensor<B, 3>,
        token_type_ids: Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Result<Tensor<B, 3>> {
        let [batch_size, seq_len, _] = inputs_embeds.dims();
        ensure!(
            seq_len <= self.max_position_embeddings,
            "Sequence length {seq_len} exceeds the position table ({})",
            self.max_position_embeddings
        );

        // Self-attention is permutation-invariant, so position must be injected explicitly.
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &inputs_embeds.device())
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb  = self.position_embedding.forward(positions);
        let type_emb = self.token_type_embedding.forward(token_type_ids);

        let x = self.embedding_norm.forward(inputs_embeds + pos_emb + type_emb);
        let mut x = self.dropout.forward(x);

        let pad_mask = attention_mask.equal_elem(0);
        for layer in &self.layers {
            x = layer.forward(x, pad_mask.clone());
        }
        Ok(self.lm_head.forward(x))
    }
}

// ─── Trigger-augmented model ─────────────────────────────────────────────────

/// Logits plus, when labels were supplied, the masked-LM loss.
pub struct MlmOutput<B: Backend> {
    pub logits: Tensor<B, 3>,
    pub loss:   Option<Tensor<B, 1>>,
}

/// A model that can run the trigger-augmented forward pass. The
/// decoder and the evaluators only depend on this.
pub trait TriggerForward<B: Backend> {
    /// Never mutates `inputs`. Errors when a row's trigger-slot
    /// count differs from the number of trigger vectors.
    fn forward_with_triggers(
        &self,
        inputs: &ModelInputs<B>,
        labels: Option<Tensor<B, 2, Int>>,
    ) -> Result<MlmOutput<B>>;
}

/// An MLM plus the learned trigger vectors [num_triggers, d_model].
#[derive(Module, Debug)]
pub struct PromptedMlm<B: Backend> {
    pub encoder:  MlmEncoder<B>,
    pub triggers: Param<Tensor<B, 2>>,
}

impl<B: Backend> PromptedMlm<B> {
    /// Trigger vectors drawn from N(0, 1).
    pub fn new(encoder: MlmEncoder<B>, num_triggers: usize, device: &B::Device) -> Self {
        let hidden   = encoder.hidden_size();
        let triggers = Tensor::<B, 2>::random([num_triggers, hidden], Distribution::Normal(0.0, 1.0), device);
        Self { encoder, triggers: Param::from_tensor(triggers) }
    }

    /// Overwrite the trigger vectors with the word embeddings of `token_ids`.
    pub fn with_initial_trigger(self, token_ids: &[u32]) -> Result<Self> {
        let n = self.num_triggers();
        ensure!(
            token_ids.len() == n,
            "Initial trigger has {} tokens but the template has {n} trigger slots",
            token_ids.len()
        );
        let device = self.triggers.val().device();
        let ids: Vec<i64> = token_ids.iter().map(|&t| t as i64).collect();
        let ids = Tensor::<B, 2, Int>::from_data(TensorData::new(ids, [1, n]), &device);
        let hidden = self.encoder.hidden_size();
        let init = self.encoder.embeds(ids).reshape([n, hidden]).detach();
        Ok(Self { encoder: self.encoder, triggers: Param::from_tensor(init) })
    }

    pub fn num_triggers(&self) -> usize {
        self.triggers.val().dims()[0]
    }
}

impl<B: Backend> TriggerForward<B> for PromptedMlm<B> {
    fn forward_with_triggers(
        &self,
        inputs: &ModelInputs<B>,
        labels: Option<Tensor<B, 2, Int>>,
    ) -> Result<MlmOutput<B>> {
        let placement = trigger_placement::<B>(
            inputs.trigger_mask.clone(),
            self.num_triggers(),
            &inputs.device(),
        )?;

        let embeds = self.encoder.embeds(inputs.input_ids.clone());
        let embeds = inject_triggers(embeds, inputs.trigger_mask.clone(), placement, self.triggers.val());

        let logits = self.encoder.forward_embeds(
            embeds,
            inputs.token_type_ids.clone(),
            inputs.attention_mask.clone(),
        )?;
        let loss = labels.map(|labels| masked_lm_loss(logits.clone(), labels));
        Ok(MlmOutput { logits, loss })
    }
}

/// One-hot placement [batch, seq, num_triggers]: entry (r, p, k) is 1
/// when p is row r's k-th trigger slot, counting left to right.
/// `None` when the model has no triggers.
pub fn trigger_placement<B: Backend>(
    trigger_mask: Tensor<B, 2, Bool>,
    num_triggers: usize,
    device:       &B::Device,
) -> Result<Option<Tensor<B, 3>>> {
    let [batch_size, seq_len] = trigger_mask.dims();
    let mask = to_bool_vec(trigger_mask)?;

    let mut placement = vec![0f32; batch_size * seq_len * num_triggers];
    for row in 0..batch_size {
        let mut k = 0usize;
        for pos in 0..seq_len {
            if mask[row * seq_len + pos] {
                if k < num_triggers {
                    placement[(row * seq_len + pos) * num_triggers + k] = 1.0;
                }
                k += 1;
            }
        }
        ensure!(
            k == num_triggers,
            "Row {row} has {k} trigger positions but the model has {num_triggers} trigger vectors"
        );
    }

    if num_triggers == 0 {
        return Ok(None);
    }
    Ok(Some(Tensor::from_data(
        TensorData::new(placement, [batch_size, seq_len, num_triggers]),
        device,
    )))
}

/// Replace the embeddings at trigger slots with the shared trigger
/// vectors, identically for every row.
pub fn inject_triggers<B: Backend>(
    embeds:       Tensor<B, 3>,
    trigger_mask: Tensor<B, 2, Bool>,
    placement:    Option<Tensor<B, 3>>,
    triggers:     Tensor<B, 2>,
) -> Tensor<B, 3> {
    let Some(placement) = placement else {
        return embeds;
    };
    let [batch_size, _, hidden] = embeds.dims();
    let [num_triggers, _] = triggers.dims();

    let keep = trigger_mask.bool_not().float().unsqueeze_dim::<3>(2);
    let shared = triggers
        .unsqueeze::<3>()
        .expand([batch_size, num_triggers, hidden]);
    embeds * keep + placement.matmul(shared)
}

/// Cross-entropy over positions whose label isn't IGNORE_INDEX,
/// averaged over those positions.
pub fn masked_lm_loss<B: Backend>(logits: Tensor<B, 3>, labels: Tensor<B, 2, Int>) -> Tensor<B, 1> {
    let [batch_size, seq_len, vocab] = logits.dims();
    let n = batch_size * seq_len;

    let logits  = logits.reshape([n, vocab]);
    let labels  = labels.reshape([n]);
    let ignored = labels.clone().equal_elem(IGNORE_INDEX);
    let weights = ignored.clone().bool_not().float();
    let targets = labels.mask_fill(ignored, 0).unsqueeze_dim::<2>(1);

    let picked = activation::log_softmax(logits, 1)
        .gather(1, targets)
        .reshape([n]);
    let count = weights.clone().sum().clamp_min(1.0);
    (picked * weights).sum().neg() / count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::{TriggerBatcher, TriggerBatch};
    use crate::data::templatizer::TemplatizedInstance;
    use crate::ml::readback::{to_f32_vec, to_i64_vec};
    use burn::data::dataloader::batcher::Batcher;

    type TestBackend = burn::backend::NdArray;
    type TestAutodiff = burn::backend::Autodiff<TestBackend>;

    fn tiny_config(vocab: usize) -> MlmEncoderConfig {
        MlmEncoderConfig::new(vocab)
            .with_max_position_embeddings(16)
            .with_d_model(8)
            .with_num_heads(2)
            .with_num_layers(1)
            .with_d_ff(16)
            .with_dropout(0.0)
    }

    /// Rows of length 6, trigger at `trigger`, predict at 4.
    fn batch<B: Backend>(rows: usize, trigger: &[usize]) -> TriggerBatch<B> {
        let items = (0..rows)
            .map(|r| {
                let mut labels = vec![IGNORE_INDEX; 6];
                labels[4] = 3 + r as i64;
                TemplatizedInstance {
                    input_ids:      vec![1, 2, 2, 5, 2, 1],
                    token_type_ids: vec![0; 6],
                    trigger_mask:   (0..6).map(|i| trigger.contains(&i)).collect(),
                    predict_mask:   (0..6).map(|i| i == 4).collect(),
                    labels,
                }
            })
            .collect();
        TriggerBatcher::<B>::new(Default::default(), 0).batch(items)
    }

    #[test]
    fn test_forward_shapes_and_loss() {
        let device = Default::default();
        let model = PromptedMlm::new(tiny_config(12).init::<TestBackend>(&device), 1, &device);
        let b = batch::<TestBackend>(2, &[1]);

        let out = model.forward_with_triggers(&b.inputs, Some(b.labels)).unwrap();
        assert_eq!(out.logits.dims(), [2, 6, 12]);
        let loss = to_f32_vec(out.loss.unwrap()).unwrap();
        assert!(loss[0].is_finite() && loss[0] > 0.0);
    }

    #[test]
    fn test_forward_leaves_inputs_untouched() {
        let device = Default::default();
        let model = PromptedMlm::new(tiny_config(12).init::<TestBackend>(&device), 1, &device);
        let b = batch::<TestBackend>(2, &[1]);
        let before = to_i64_vec(b.inputs.input_ids.clone()).unwrap();

        let out = model.forward_with_triggers(&b.inputs, None).unwrap();
        assert!(out.loss.is_none());
        assert_eq!(to_i64_vec(b.inputs.input_ids.clone()).unwrap(), before);
    }

    #[test]
    fn test_trigger_count_mismatch_is_an_error() {
        let device = Default::default();
        let model = PromptedMlm::new(tiny_config(12).init::<TestBackend>(&device), 1, &device);
        let b = batch::<TestBackend>(2, &[1, 2]);
        let err = model.forward_with_triggers(&b.inputs, None).err().unwrap();
        assert!(err.to_string().contains("2 trigger positions"));
    }

    #[test]
    fn test_inject_places_kth_trigger_at_kth_slot() {
        let device = Default::default();
        let b = batch::<TestBackend>(2, &[1, 3]);
        let mask = b.inputs.trigger_mask.clone();
        let placement = trigger_placement::<TestBackend>(mask.clone(), 2, &device).unwrap();

        let embeds   = Tensor::<TestBackend, 3>::ones([2, 6, 2], &device);
        let triggers = Tensor::<TestBackend, 2>::from_floats([[5.0, 6.0], [7.0, 8.0]], &device);
        let out = to_f32_vec(inject_triggers(embeds, mask, placement, triggers)).unwrap();

        for row in 0..2 {
            let at = |pos: usize| &out[(row * 6 + pos) * 2..(row * 6 + pos) * 2 + 2];
            assert_eq!(at(0), &[1.0, 1.0]);
            assert_eq!(at(1), &[5.0, 6.0]);
            assert_eq!(at(3), &[7.0, 8.0]);
            assert_eq!(at(4), &[1.0, 1.0]);
        }
    }

    #[test]
    fn test_masked_lm_loss_ignores_sentinel_positions() {
        let device = Default::default();
        // position 0 is scored (uniform → ln 2); position 1 is ignored
        // even though its logits are extreme.
        let logits = Tensor::<TestBackend, 3>::from_floats([[[0.0, 0.0], [100.0, -100.0]]], &device);
        let labels = Tensor::<TestBackend, 2, Int>::from_ints([[1, IGNORE_INDEX]], &device);
        let loss = to_f32_vec(masked_lm_loss(logits, labels)).unwrap();
        assert!((loss[0] - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_gradient_reaches_triggers() {
        let device = Default::default();
        let model = PromptedMlm::new(tiny_config(12).init::<TestAutodiff>(&device), 1, &device);
        let b = batch::<TestAutodiff>(2, &[1]);

        let loss = model.forward_with_triggers(&b.inputs, Some(b.labels)).unwrap().loss.unwrap();
        let grads = loss.backward();
        let grad = model.triggers.val().grad(&grads).expect("trigger gradient");
        assert_eq!(grad.dims(), [1, 8]);
    }

    #[test]
    fn test_initial_trigger_copies_embeddings() {
        let device = Default::default();
        let model = PromptedMlm::new(tiny_config(12).init::<TestBackend>(&device), 2, &device);
        let expected = to_f32_vec(
            model.encoder.embeds(Tensor::<TestBackend, 2, Int>::from_ints([[7, 9]], &device)),
        ).unwrap();

        let model = model.with_initial_trigger(&[7, 9]).unwrap();
        assert_eq!(to_f32_vec(model.triggers.val()).unwrap(), expected);
        assert!(model.with_initial_trigger(&[7]).is_err());
    }

    struct Counting<'a> {
        model: &'a PromptedMlm<TestBackend>,
        calls: std::cell::Cell<usize>,
    }

    impl TriggerForward<TestBackend> for Counting<'_> {
        fn forward_with_triggers(
            &self,
            inputs: &ModelInputs<TestBackend>,
            labels: Option<Tensor<TestBackend, 2, Int>>,
        ) -> Result<MlmOutput<TestBackend>> {
            self.calls.set(self.calls.get() + 1);
            self.model.forward_with_triggers(inputs, labels)
        }
    }

    #[test]
    fn test_parallel_decode_with_one_trigger_vector() {
        use crate::domain::strategy::DecodingStrategy;
        use crate::ml::decoder::decode;

        let device = Default::default();
        let model = PromptedMlm::new(tiny_config(12).init::<TestBackend>(&device), 1, &device);
        let counting = Counting { model: &model, calls: std::cell::Cell::new(0) };
        let b = batch::<TestBackend>(2, &[1]);

        let decoded = decode(&counting, b.inputs, DecodingStrategy::Parallel).unwrap();
        assert_eq!(counting.calls.get(), 1);
        assert_eq!(decoded.predictions.dims(), [2, 6]);
        let out = to_i64_vec(decoded.predictions).unwrap();
        for row in 0..2 {
            for pos in 0..6 {
                let token = out[row * 6 + pos];
                if pos == 4 {
                    assert!((0..12).contains(&token));
                } else {
                    assert_eq!(token, IGNORE_INDEX);
                }
            }
        }
    }
}
