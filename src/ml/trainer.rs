// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Train + dev loop using Burn's DataLoader and AdamW.
//
//   - Training uses MyBackend (Autodiff<Wgpu>) for gradients
//   - model.valid() returns the model on the inner backend
//     (Wgpu) with dropout off; dev/test batchers use it too
//   - Only the trigger vectors are trained by default; the
//     finetune mode adds the MLM head or the whole encoder as
//     a second parameter group with its own learning rate
//   - Gradients are accumulated over `accumulation_steps`
//     batches before each optimiser step
//   - The checkpoint is overwritten whenever dev accuracy
//     strictly improves; the best one is restored for test
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW

use anyhow::Result;
use burn::{
    data::dataloader::DataLoaderBuilder,
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsAccumulator, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use tokenizers::Tokenizer;

use crate::application::train_use_case::TrainConfig;
use crate::data::{batcher::{TriggerBatch, TriggerBatcher}, dataset::TriggerDataset};
use crate::domain::strategy::FinetuneMode;
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger, Split},
    model_dir::ModelDir,
    tokenizer_store::TokenizerStore,
};
use crate::ml::{
    evaluator::Evaluator,
    model::{MlmEncoderConfig, PromptedMlm},
};

type MyBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Everything the loop needs besides the flags.
pub struct TrainingSetup<'a> {
    pub model_dir:       &'a ModelDir,
    pub encoder_config:  MlmEncoderConfig,
    pub tokenizer:       &'a Tokenizer,
    pub pad_token_id:    u32,
    pub num_triggers:    usize,
    pub initial_trigger: Option<Vec<u32>>,
    pub evaluator:       Evaluator,
    pub train:           TriggerDataset,
    pub dev:             TriggerDataset,
    pub test:            TriggerDataset,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSummary {
    pub best_dev_accuracy: Option<f64>,
    pub test_accuracy:     f64,
}

pub struct TrainingOutcome<B: Backend> {
    pub model:   PromptedMlm<B>,
    pub summary: TrainingSummary,
}

pub fn run_training(
    cfg:     &TrainConfig,
    setup:   TrainingSetup<'_>,
    ckpt:    CheckpointManager,
    metrics: MetricsLogger,
) -> Result<TrainingSummary> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    let outcome = train_loop::<MyBackend>(cfg, setup, &ckpt, &metrics, device)?;
    Ok(outcome.summary)
}

pub fn train_loop<B: AutodiffBackend>(
    cfg:     &TrainConfig,
    setup:   TrainingSetup<'_>,
    ckpt:    &CheckpointManager,
    metrics: &MetricsLogger,
    device:  B::Device,
) -> Result<TrainingOutcome<B>> {
    B::seed(cfg.seed);

    // ── Build model ───────────────────────────────────────────────────────────
    let encoder_config = if cfg.disable_dropout {
        setup.encoder_config.clone().with_dropout(0.0)
    } else {
        setup.encoder_config.clone()
    };
    let encoder   = setup.model_dir.load_encoder::<B>(&encoder_config, &device)?;
    let mut model = PromptedMlm::new(encoder, setup.num_triggers, &device);
    if let Some(ids) = &setup.initial_trigger {
        model = model.with_initial_trigger(ids)?;
        tracing::info!("Initialised triggers from {} token embedding(s)", ids.len());
    }

    if ckpt.has_model() {
        if cfg.force_overwrite {
            tracing::warn!("Ignoring existing checkpoint '{}'", ckpt.model_file().display());
        } else {
            model = ckpt.load_model(model, &device)?;
            tracing::info!("Resuming from existing checkpoint");
        }
    }
    tracing::info!(
        "Model ready: {} trigger(s), d_model={}, finetune mode '{}'",
        setup.num_triggers, model.encoder.hidden_size(), cfg.finetune_mode
    );

    // ── AdamW optimiser ───────────────────────────────────────────────────────
    let mut optim_cfg = AdamWConfig::new()
        .with_weight_decay(1e-6)
        .with_beta_1(0.9)
        .with_beta_2(0.999);
    if let Some(clip) = cfg.clip {
        optim_cfg = optim_cfg.with_grad_clipping(Some(GradientClippingConfig::Norm(clip as f32)));
    }
    let mut optim = optim_cfg.init::<B, PromptedMlm<B>>();
    let finetune_lr = cfg.finetune_lr.unwrap_or(cfg.lr);

    // ── Data loaders ──────────────────────────────────────────────────────────
    let train_loader = DataLoaderBuilder::new(TriggerBatcher::<B>::new(device.clone(), setup.pad_token_id))
        .batch_size(cfg.bsz)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(setup.train);
    let eval_batcher = TriggerBatcher::<B::InnerBackend>::new(device.clone(), setup.pad_token_id);
    let dev_loader = DataLoaderBuilder::new(eval_batcher.clone())
        .batch_size(cfg.bsz)
        .num_workers(1)
        .build(setup.dev);
    let test_loader = DataLoaderBuilder::new(eval_batcher)
        .batch_size(cfg.bsz)
        .num_workers(1)
        .build(setup.test);

    let evaluator = &setup.evaluator;
    let tok_store = TokenizerStore::new(ckpt.dir());
    let acc_steps = cfg.accumulation_steps.max(1);
    let mut best_dev_accuracy: Option<f64> = None;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.epochs {
        let mut trigger_grads  = GradientsAccumulator::new();
        let mut finetune_grads = GradientsAccumulator::new();
        let mut pending = 0usize;

        let mut loss_sum = 0.0f64;
        let mut correct  = 0usize;
        let mut examples = 0usize;

        for (i, batch) in train_loader.iter().enumerate() {
            let batch_size = batch.batch_size();
            let eval = evaluator.evaluate(&model, batch.inputs, batch.labels)?;

            let loss_val = eval.loss.clone().into_scalar().elem::<f64>();
            loss_sum += loss_val * batch_size as f64;
            correct  += eval.correct;
            examples += batch_size;
            if !cfg.quiet {
                tracing::debug!(epoch, batch = i, loss = loss_val, "train step");
            }

            let mut grads = eval.loss.div_scalar(acc_steps as f32).backward();
            let trigger = GradientsParams::from_module(&mut grads, &model.triggers);
            trigger_grads.accumulate(&model, trigger);
            match cfg.finetune_mode {
                FinetuneMode::Trigger => {}
                FinetuneMode::Partial => {
                    let head = GradientsParams::from_module(&mut grads, &model.encoder.lm_head);
                    finetune_grads.accumulate(&model, head);
                }
                FinetuneMode::All => {
                    let all = GradientsParams::from_module(&mut grads, &model.encoder);
                    finetune_grads.accumulate(&model, all);
                }
            }
            pending += 1;

            if i % acc_steps == acc_steps - 1 {
                model = optimizer_step(&mut optim, model, &mut trigger_grads, &mut finetune_grads, cfg, finetune_lr);
                pending = 0;
            }
        }
        // flush a partial accumulation window at the end of the epoch
        if pending > 0 {
            model = optimizer_step(&mut optim, model, &mut trigger_grads, &mut finetune_grads, cfg, finetune_lr);
        }

        let train_metrics = EpochMetrics::new(
            Split::Train, epoch, mean(loss_sum, examples), ratio(correct, examples),
        );
        metrics.log(&train_metrics)?;

        // ── Dev phase ─────────────────────────────────────────────────────────
        let model_valid = model.valid();
        let (dev_loss, dev_accuracy) = evaluate_split(&model_valid, evaluator, dev_loader.iter(), cfg.quiet)?;
        let dev_metrics = EpochMetrics::new(Split::Dev, epoch, dev_loss, dev_accuracy);
        metrics.log(&dev_metrics)?;

        tracing::info!(
            "Epoch {:>3}/{} | train_loss={:.4} | train_acc={:.1}% | dev_loss={:.4} | dev_acc={:.1}%",
            epoch, cfg.epochs,
            train_metrics.loss, train_metrics.accuracy * 100.0,
            dev_loss, dev_accuracy * 100.0,
        );

        if dev_metrics.improves_on(best_dev_accuracy) {
            best_dev_accuracy = Some(dev_accuracy);
            ckpt.save_model(&model)?;
            tok_store.save(setup.tokenizer)?;
            tracing::info!("New best dev accuracy {:.4}; checkpoint saved", dev_accuracy);
        }
    }

    // ── Test phase ────────────────────────────────────────────────────────────
    if ckpt.has_model() {
        model = ckpt.load_model(model, &device)?;
    } else {
        tracing::warn!("No checkpoint to restore; testing the final model");
    }
    let (test_loss, test_accuracy) = evaluate_split(&model.valid(), evaluator, test_loader.iter(), cfg.quiet)?;
    metrics.log(&EpochMetrics::new(Split::Test, 0, test_loss, test_accuracy))?;
    tracing::info!("Test loss={:.4} | test accuracy={:.4}", test_loss, test_accuracy);

    if cfg.tmp {
        ckpt.remove_model()?;
    }

    tracing::info!("Training complete!");
    Ok(TrainingOutcome {
        model,
        summary: TrainingSummary { best_dev_accuracy, test_accuracy },
    })
}

/// One optimiser step per parameter group, then reset both windows.
fn optimizer_step<B: AutodiffBackend, O: Optimizer<PromptedMlm<B>, B>>(
    optim:          &mut O,
    model:          PromptedMlm<B>,
    trigger_grads:  &mut GradientsAccumulator<PromptedMlm<B>>,
    finetune_grads: &mut GradientsAccumulator<PromptedMlm<B>>,
    cfg:            &TrainConfig,
    finetune_lr:    f64,
) -> PromptedMlm<B> {
    let model = optim.step(cfg.lr, model, trigger_grads.grads());
    match cfg.finetune_mode {
        FinetuneMode::Trigger => model,
        FinetuneMode::Partial | FinetuneMode::All => optim.step(finetune_lr, model, finetune_grads.grads()),
    }
}

/// Per-example mean loss and accuracy over a whole split.
fn evaluate_split<B: Backend>(
    model:     &PromptedMlm<B>,
    evaluator: &Evaluator,
    batches:   impl Iterator<Item = TriggerBatch<B>>,
    quiet:     bool,
) -> Result<(f64, f64)> {
    let mut loss_sum = 0.0f64;
    let mut correct  = 0usize;
    let mut examples = 0usize;

    for (i, batch) in batches.enumerate() {
        let batch_size = batch.batch_size();
        let eval = evaluator.evaluate(model, batch.inputs, batch.labels)?;
        let loss_val = eval.loss.into_scalar().elem::<f64>();
        loss_sum += loss_val * batch_size as f64;
        correct  += eval.correct;
        examples += batch_size;
        if !quiet {
            tracing::debug!(batch = i, loss = loss_val, "eval step");
        }
    }
    Ok((mean(loss_sum, examples), ratio(correct, examples)))
}

fn mean(sum: f64, n: usize) -> f64 {
    if n > 0 { sum / n as f64 } else { f64::NAN }
}

fn ratio(correct: usize, n: usize) -> f64 {
    if n > 0 { correct as f64 / n as f64 } else { 0.0 }
}
