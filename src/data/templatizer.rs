// ============================================================
// Layer 4 — Templatizer
// ============================================================
// Turns one raw Instance into model-ready token sequences by
// pushing it through a prompt template such as
//
//   [CLS] {sentence} [T] [T] [T] [P] . [SEP]
//
//   {sentence} — replaced by the instance's "sentence" field
//   [T]        — a trigger slot (learned continuous embedding)
//   [P]        — a predict slot (holds the label token)
//
// Worked example (label "1" mapped to "great"):
//
//   text:    [CLS] a gorgeous film [T] [T] [T] [P] . [SEP]
//   ids:     CLS   a gorgeous film MSK MSK MSK MSK .  SEP
//   trigger:  0    0    0      0    1   1   1   0  0   0
//   predict:  0    0    0      0    0   0   0   1  0   0
//   labels: -100 ...                           great ...
//
// A multi-token label expands [P] into one slot per label
// token. With add_padding the template's [P] run is instead a
// fixed-width slot and short labels are right-padded.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use tokenizers::Tokenizer;

use crate::domain::instance::Instance;
use crate::infra::tokenizer_store::{SpecialTokenIds, PREDICT_TOKEN, TRIGGER_TOKEN};

/// Labels outside predict positions carry this value and are
/// skipped by the loss.
pub const IGNORE_INDEX: i64 = -100;

/// One templatized instance, unpadded.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplatizedInstance {
    pub input_ids:      Vec<u32>,
    pub token_type_ids: Vec<u32>,
    pub trigger_mask:   Vec<bool>,
    pub predict_mask:   Vec<bool>,
    pub labels:         Vec<i64>,
}

impl TemplatizedInstance {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Label token ids at the predict positions, left to right.
    pub fn label_tokens(&self) -> Vec<i64> {
        self.labels.iter().copied().filter(|&l| l != IGNORE_INDEX).collect()
    }
}

pub struct Templatizer {
    template:        String,
    tokenizer:       Tokenizer,
    ids:             SpecialTokenIds,
    label_field:     String,
    label_map:       Option<BTreeMap<String, String>>,
    add_padding:     bool,
    num_triggers:    usize,
    num_predict:     usize,
    max_len:         Option<usize>,
}

impl Templatizer {
    pub fn new(
        template:    impl Into<String>,
        tokenizer:   Tokenizer,
        ids:         SpecialTokenIds,
        label_field: impl Into<String>,
        label_map:   Option<BTreeMap<String, String>>,
        add_padding: bool,
    ) -> Result<Self> {
        let template     = template.into();
        let num_triggers = count_marker(&template, TRIGGER_TOKEN);
        let num_predict  = count_marker(&template, PREDICT_TOKEN);

        if num_predict == 0 {
            bail!("Template '{template}' has no {PREDICT_TOKEN} slot");
        }
        if !add_padding && num_predict != 1 {
            bail!(
                "Template '{template}' has {num_predict} {PREDICT_TOKEN} slots; \
                 use a single slot or enable --add-padding"
            );
        }

        Ok(Self {
            template,
            tokenizer,
            ids,
            label_field: label_field.into(),
            label_map,
            add_padding,
            num_triggers,
            num_predict,
            max_len: None,
        })
    }

    /// Reject instances whose templatized length exceeds `max_len`.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn num_trigger_tokens(&self) -> usize {
        self.num_triggers
    }

    pub fn special_ids(&self) -> SpecialTokenIds {
        self.ids
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Push one instance through the template.
    pub fn templatize(&self, instance: &Instance) -> Result<TemplatizedInstance> {
        // ── Step 1: Resolve the label text ────────────────────────────────────
        let raw_label = instance
            .get(&self.label_field)
            .with_context(|| format!("Instance has no label field '{}'", self.label_field))?;
        let label = match &self.label_map {
            Some(map) => map
                .get(raw_label)
                .with_context(|| format!("Label '{raw_label}' is not in the label map"))?
                .as_str(),
            None => raw_label,
        };

        // ── Step 2: Tokenize the label ────────────────────────────────────────
        let mut label_tokens = encode_label(&self.tokenizer, label)?;

        let predict_text = if self.add_padding {
            if label_tokens.len() > self.num_predict {
                bail!(
                    "Label '{label}' needs {} tokens but the template only has {} {PREDICT_TOKEN} slots",
                    label_tokens.len(),
                    self.num_predict
                );
            }
            label_tokens.resize(self.num_predict, self.ids.pad);
            PREDICT_TOKEN.to_string()
        } else {
            vec![PREDICT_TOKEN; label_tokens.len()].join(" ")
        };

        // ── Step 3: Fill fields and expand the predict slot ───────────────────
        let filled = fill_template(&self.template, instance, &self.label_field)?;
        let text   = filled.replace(PREDICT_TOKEN, &predict_text);

        // ── Step 4: Encode and build masks ────────────────────────────────────
        let enc = self
            .tokenizer
            .encode(text.as_str(), false)
            .map_err(|e| anyhow::anyhow!("Template tokenise: {e}"))?;
        let mut input_ids      = enc.get_ids().to_vec();
        let token_type_ids     = enc.get_type_ids().to_vec();
        let trigger_mask: Vec<bool> = input_ids.iter().map(|&t| t == self.ids.trigger).collect();
        let predict_mask: Vec<bool> = input_ids.iter().map(|&t| t == self.ids.predict).collect();

        let n_trigger = trigger_mask.iter().filter(|&&m| m).count();
        let n_predict = predict_mask.iter().filter(|&&m| m).count();
        if n_trigger != self.num_triggers {
            bail!("Expected {} trigger slots after encoding, found {n_trigger}", self.num_triggers);
        }
        if n_predict != label_tokens.len() {
            bail!("Expected {} predict slots after encoding, found {n_predict}", label_tokens.len());
        }
        if let Some(max_len) = self.max_len {
            if input_ids.len() > max_len {
                bail!("Templatized length {} exceeds the model limit of {max_len}", input_ids.len());
            }
        }

        // Placeholders never reach the embedding table.
        let mut labels = vec![IGNORE_INDEX; input_ids.len()];
        let mut next_label = label_tokens.iter();
        for (pos, id) in input_ids.iter_mut().enumerate() {
            if predict_mask[pos] {
                if let Some(&tok) = next_label.next() {
                    labels[pos] = tok as i64;
                }
                *id = self.ids.mask;
            } else if trigger_mask[pos] {
                *id = self.ids.mask;
            }
        }

        Ok(TemplatizedInstance { input_ids, token_type_ids, trigger_mask, predict_mask, labels })
    }
}

/// Token ids of a verbalized label, without special tokens. The
/// leading space makes BPE vocabularies pick the word-initial form.
pub fn encode_label(tokenizer: &Tokenizer, label: &str) -> Result<Vec<u32>> {
    let ids = tokenizer
        .encode(format!(" {label}").as_str(), false)
        .map_err(|e| anyhow::anyhow!("Label tokenise: {e}"))?
        .get_ids()
        .to_vec();
    if ids.is_empty() {
        bail!("Label '{label}' tokenizes to nothing");
    }
    Ok(ids)
}

fn count_marker(template: &str, marker: &str) -> usize {
    template.split_whitespace().filter(|t| *t == marker).count()
}

/// Replace `{field}` references with instance text. `{{` and `}}`
/// are literal braces.
fn fill_template(template: &str, instance: &Instance, label_field: &str) -> Result<String> {
    let mut out   = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch)  => name.push(ch),
                        None      => bail!("Unclosed '{{' in template '{template}'"),
                    }
                }
                if name == label_field {
                    bail!("The label field '{name}' cannot appear in the template");
                }
                let value = instance
                    .get(&name)
                    .with_context(|| format!("Instance has no field '{name}'"))?;
                out.push_str(value);
            }
            '}' => bail!("Unmatched '}}' in template '{template}'"),
            c => out.push(c),
        }
    }
    Ok(out)
}
