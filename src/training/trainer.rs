//! Training loop implementation for GAN-CLS
//!
//! Each step makes one discriminator update followed by one generator
//! update, both driven by the same noise and caption embeddings. Sample
//! grids and checkpoints are produced on fixed step cadences.

use std::path::PathBuf;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::Tensor;
use tracing::{info, warn};

use super::cadence::Cadence;
use super::losses::LossComposer;
use super::metrics::{StepRecord, TrainingMetrics};
use super::optimizer::Adam;
use crate::context::ExecutionContext;
use crate::data::{array_to_tensor, DatasetProvider};
use crate::error::{GanClsError, Result};
use crate::model::GanCls;
use crate::utils::{sample_path, CheckpointManager, CheckpointMeta, PngGridWriter, SampleWriter};

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Number of training epochs
    pub epochs: usize,
    /// Examples per step
    pub batch_size: usize,
    /// Size of the fixed sample grid
    pub sample_num: usize,
    /// Adam learning rate for both networks
    pub learning_rate: f64,
    /// Adam first-moment decay
    pub beta1: f64,
    /// Weight of the mismatched-caption term
    pub alpha: f64,
    /// Smoothed target for real matching pairs
    pub real_label: f64,
    /// Captions averaged into each training embedding
    pub caption_window: usize,
    /// Root directory for sample grids
    pub sample_dir: PathBuf,
    pub sample_cadence: Cadence,
    pub checkpoint_cadence: Cadence,
    /// Draw a progress bar per epoch
    pub show_progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 25,
            batch_size: 64,
            sample_num: 64,
            learning_rate: 2e-4,
            beta1: 0.5,
            alpha: 0.5,
            real_label: 0.9,
            caption_window: 4,
            sample_dir: PathBuf::from("samples"),
            sample_cadence: Cadence::new(100, 1),
            checkpoint_cadence: Cadence::new(500, 2),
            show_progress: true,
        }
    }
}

/// Fixed noise and captions rendered on the sampling cadence
pub struct SampleGrid {
    /// Shape (N, z_dim)
    pub noise: Tensor,
    /// Shape (N, embed_dim)
    pub embeddings: Tensor,
    pub captions: Vec<String>,
}

impl SampleGrid {
    /// Build a grid from `n` held-out examples starting at `offset`
    pub fn from_dataset(
        ctx: &ExecutionContext,
        dataset: &mut dyn DatasetProvider,
        n: usize,
        offset: usize,
        z_dim: i64,
    ) -> Result<Self> {
        let batch = dataset.next_batch_test(n, offset, 1)?;
        let embeddings = array_to_tensor(&batch.embeddings.index_axis(Axis(0), 0), ctx.device());
        let captions = batch
            .captions
            .into_iter()
            .map(|c| c.into_iter().next().unwrap_or_default())
            .collect();

        Ok(Self {
            noise: ctx.uniform_noise(n as i64, z_dim),
            embeddings,
            captions,
        })
    }

    pub fn len(&self) -> usize {
        self.captions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captions.is_empty()
    }

    /// Run the generator in inference mode on the grid
    pub fn render(&self, model: &GanCls) -> Result<Tensor> {
        tch::no_grad(|| model.generate(&self.noise, &self.embeddings, false))
    }

    pub fn log_captions(&self) {
        info!("Sample captions:");
        for (i, caption) in self.captions.iter().enumerate() {
            info!("{:3}: {}", i + 1, caption);
        }
    }
}

/// Losses of one discriminator update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscriminatorStepLosses {
    pub total: f64,
    pub real_match: f64,
    pub real_mismatch: f64,
    pub synthetic: f64,
}

/// One discriminator update
///
/// The generator output is computed without gradients, so only
/// discriminator parameters receive updates.
#[allow(clippy::too_many_arguments)]
pub fn discriminator_step(
    model: &GanCls,
    composer: &LossComposer,
    disc_opt: &mut Adam,
    real_images: &Tensor,
    mismatched_images: &Tensor,
    embeddings: &Tensor,
    noise: &Tensor,
) -> Result<DiscriminatorStepLosses> {
    let fake_images = tch::no_grad(|| model.generate(noise, embeddings, true))?;

    let (_, real_match_logits) = model.discriminate(real_images, embeddings, true)?;
    let (_, real_mismatch_logits) = model.discriminate(mismatched_images, embeddings, true)?;
    let (_, synthetic_logits) = model.discriminate(&fake_images, embeddings, true)?;

    let losses =
        composer.discriminator_losses(&synthetic_logits, &real_match_logits, &real_mismatch_logits)?;

    disc_opt.zero_grad();
    losses.total.backward();
    disc_opt.step();

    Ok(DiscriminatorStepLosses {
        total: losses.total.double_value(&[]),
        real_match: losses.real_match.double_value(&[]),
        real_mismatch: losses.real_mismatch.double_value(&[]),
        synthetic: losses.synthetic.double_value(&[]),
    })
}

/// One generator update
///
/// Discriminator parameters are frozen while the generator loss is
/// backpropagated through them.
pub fn generator_step(
    model: &mut GanCls,
    composer: &LossComposer,
    gen_opt: &mut Adam,
    embeddings: &Tensor,
    noise: &Tensor,
) -> Result<f64> {
    model.disc_vs.freeze();
    let loss = generator_loss(model, composer, embeddings, noise);
    model.disc_vs.unfreeze();
    let loss = loss?;

    gen_opt.zero_grad();
    loss.backward();
    gen_opt.step();

    Ok(loss.double_value(&[]))
}

fn generator_loss(
    model: &GanCls,
    composer: &LossComposer,
    embeddings: &Tensor,
    noise: &Tensor,
) -> Result<Tensor> {
    let fake_images = model.generate(noise, embeddings, true)?;
    let (_, synthetic_logits) = model.discriminate(&fake_images, embeddings, true)?;
    Ok(composer.generator_loss(&synthetic_logits))
}

/// Mutable optimization state of a run
///
/// Parameters live in the model's variable stores; this holds the step
/// counter and one Adam instance per parameter set. All of it is written
/// to a checkpoint.
pub struct TrainingState {
    /// Step counter, starting at 1 for a fresh run
    pub step: u64,
    pub gen_opt: Adam,
    pub disc_opt: Adam,
}

impl TrainingState {
    /// Fresh optimizers over the model's current parameters
    pub fn new(model: &GanCls, learning_rate: f64, beta1: f64, step: u64) -> Self {
        Self {
            step,
            gen_opt: model.gen_optimizer(learning_rate, beta1),
            disc_opt: model.disc_optimizer(learning_rate, beta1),
        }
    }

    /// Restore parameters and Adam moments from the latest checkpoint, if any
    pub fn restore(
        model: &mut GanCls,
        checkpoints: &CheckpointManager,
        learning_rate: f64,
        beta1: f64,
    ) -> Result<Self> {
        let (restored, step) = checkpoints.load(model)?;
        if !restored {
            return Ok(Self::new(model, learning_rate, beta1, 1));
        }

        let mut state = Self::new(model, learning_rate, beta1, step);
        checkpoints.load_optimizers(step, &mut state.gen_opt, &mut state.disc_opt)?;
        Ok(state)
    }

    /// One discriminator update then one generator update on the same batch
    pub fn train_step(
        &mut self,
        model: &mut GanCls,
        composer: &LossComposer,
        real_images: &Tensor,
        mismatched_images: &Tensor,
        embeddings: &Tensor,
        noise: &Tensor,
    ) -> Result<(DiscriminatorStepLosses, f64)> {
        let d = discriminator_step(
            model,
            composer,
            &mut self.disc_opt,
            real_images,
            mismatched_images,
            embeddings,
            noise,
        )?;
        let g_loss = generator_step(model, composer, &mut self.gen_opt, embeddings, noise)?;
        self.step += 1;
        Ok((d, g_loss))
    }
}

/// GAN-CLS Trainer
pub struct Trainer<W: SampleWriter = PngGridWriter> {
    config: TrainingConfig,
    ctx: ExecutionContext,
    checkpoints: CheckpointManager,
    writer: W,
    composer: LossComposer,
    metrics: TrainingMetrics,
    state: Option<TrainingState>,
}

impl<W: SampleWriter> Trainer<W> {
    /// Create a new trainer
    pub fn new(
        config: TrainingConfig,
        ctx: ExecutionContext,
        checkpoints: CheckpointManager,
        writer: W,
    ) -> Self {
        let composer = LossComposer::new(config.alpha, config.real_label);
        Self {
            config,
            ctx,
            checkpoints,
            writer,
            composer,
            metrics: TrainingMetrics::new(),
            state: None,
        }
    }

    /// Train the model for the configured number of epochs
    ///
    /// Resumes from the latest checkpoint when one exists. Sample export
    /// failures are logged and skipped; every other error ends training.
    pub fn train(
        &mut self,
        model: &mut GanCls,
        dataset: &mut dyn DatasetProvider,
    ) -> Result<&TrainingMetrics> {
        check_compatible(model, dataset)?;
        let identity = self.checkpoints.identity();
        if identity.dataset_name != dataset.name() {
            return Err(GanClsError::Config(format!(
                "dataset {} cannot use checkpoints keyed by dataset {}",
                dataset.name(),
                identity.dataset_name
            )));
        }

        let batch_size = self.config.batch_size;
        let steps_per_epoch = dataset.num_train_examples() / batch_size.max(1);
        if steps_per_epoch == 0 {
            return Err(GanClsError::Dataset(format!(
                "{} training examples cannot fill a batch of {}",
                dataset.num_train_examples(),
                batch_size
            )));
        }

        let grid = self.sample_grid(model, dataset)?;

        let mut state = TrainingState::restore(
            model,
            &self.checkpoints,
            self.config.learning_rate,
            self.config.beta1,
        )?;

        let device = self.ctx.device();
        let z_dim = model.z_dim();
        let start = Instant::now();

        info!(
            "Starting training for {} epochs, {} steps per epoch",
            self.config.epochs, steps_per_epoch
        );

        for epoch in 0..self.config.epochs {
            let mut epoch_gen_loss = 0.0;
            let mut epoch_disc_loss = 0.0;

            let pb = self.progress_bar(steps_per_epoch);

            for idx in 0..steps_per_epoch {
                let batch = dataset.next_batch(batch_size, self.config.caption_window)?;
                let real_images = array_to_tensor(&batch.real_images, device);
                let mismatched_images = array_to_tensor(&batch.mismatched_images, device);
                let embeddings = array_to_tensor(&batch.embeddings, device);
                let noise = self.ctx.uniform_noise(batch.batch_size() as i64, z_dim);

                let (d, g_loss) = state.train_step(
                    model,
                    &self.composer,
                    &real_images,
                    &mismatched_images,
                    &embeddings,
                    &noise,
                )?;

                let step = state.step;
                epoch_disc_loss += d.total;
                epoch_gen_loss += g_loss;

                self.metrics.record_step(StepRecord {
                    step,
                    epoch,
                    d_loss: d.total,
                    g_loss,
                    d_real_match: d.real_match,
                    d_real_mismatch: d.real_mismatch,
                    d_synthetic: d.synthetic,
                });

                pb.suspend(|| {
                    info!(
                        "Epoch: [{:2}] [{:4}/{:4}] time: {:4.4}, d_loss: {:.8}, g_loss: {:.8}",
                        epoch,
                        idx,
                        steps_per_epoch,
                        start.elapsed().as_secs_f64(),
                        d.total,
                        g_loss
                    )
                });
                pb.set_message(format!("G: {:.4}, D: {:.4}", g_loss, d.total));
                pb.inc(1);

                if let Some(grid) = &grid {
                    if self.config.sample_cadence.fires(step) {
                        match self.export_samples(model, grid, step, epoch, idx) {
                            Ok(path) => pb.suspend(|| info!("Saved samples to {}", path.display())),
                            Err(e) if e.is_recoverable() => pb.suspend(|| warn!("{}", e)),
                            Err(e) => return Err(e),
                        }
                    }
                }

                if self.config.checkpoint_cadence.fires(step) {
                    self.save_state(model, &state, epoch)?;
                }
            }

            pb.finish_and_clear();

            let avg_gen_loss = epoch_gen_loss / steps_per_epoch as f64;
            let avg_disc_loss = epoch_disc_loss / steps_per_epoch as f64;
            self.metrics.record_epoch(avg_gen_loss, avg_disc_loss);

            info!(
                "Epoch {}/{}: G_loss={:.4}, D_loss={:.4}",
                epoch + 1,
                self.config.epochs,
                avg_gen_loss,
                avg_disc_loss
            );

            if self.metrics.check_mode_collapse(10) {
                warn!("Possible mode collapse detected! Consider adjusting learning rates.");
            }
        }

        self.state = Some(state);
        self.save_metrics();

        Ok(&self.metrics)
    }

    /// Sample grid from the held-out split, or `None` when it is empty
    fn sample_grid(
        &self,
        model: &GanCls,
        dataset: &mut dyn DatasetProvider,
    ) -> Result<Option<SampleGrid>> {
        let available = dataset.num_test_examples();
        if available == 0 {
            warn!("No held-out examples, sample grids are disabled");
            return Ok(None);
        }

        let mut rng = match self.ctx.seed() {
            Some(seed) => StdRng::seed_from_u64(seed as u64),
            None => StdRng::from_entropy(),
        };
        let offset = rng.gen_range(0..available);

        let grid = SampleGrid::from_dataset(
            &self.ctx,
            dataset,
            self.config.sample_num,
            offset,
            model.z_dim(),
        )?;
        grid.log_captions();
        Ok(Some(grid))
    }

    fn export_samples(
        &mut self,
        model: &GanCls,
        grid: &SampleGrid,
        step: u64,
        epoch: usize,
        idx: usize,
    ) -> Result<PathBuf> {
        let export_error = |e: GanClsError| GanClsError::SampleExport {
            step,
            reason: e.to_string(),
        };

        let path = sample_path(&self.config.sample_dir, epoch, idx);
        let images = grid.render(model).map_err(export_error)?;
        self.writer.write(&images, &path).map_err(export_error)?;
        Ok(path)
    }

    /// Save a snapshot at the current step
    ///
    /// Training only saves on the checkpoint cadence; call this for a
    /// snapshot at any other point, such as after the last epoch. Before
    /// any training there are no optimizer moments, so only parameters are
    /// written.
    pub fn save_checkpoint(&self, model: &GanCls, epoch: usize) -> Result<PathBuf> {
        match &self.state {
            Some(state) => self.save_state(model, state, epoch),
            None => {
                let step = self.step();
                self.checkpoints.save(model, step, &self.meta(model, step, epoch))
            }
        }
    }

    fn save_state(&self, model: &GanCls, state: &TrainingState, epoch: usize) -> Result<PathBuf> {
        let meta = self.meta(model, state.step, epoch);
        self.checkpoints.save_state(model, state, &meta)
    }

    fn meta(&self, model: &GanCls, step: u64, epoch: usize) -> CheckpointMeta {
        CheckpointMeta::new(
            step,
            epoch,
            self.metrics.latest_disc_loss().unwrap_or(0.0),
            self.metrics.latest_gen_loss().unwrap_or(0.0),
            model.config_json(),
        )
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .map(|s| s.progress_chars("##-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }

    fn save_metrics(&self) {
        let dir = self.checkpoints.model_dir();
        let path = dir.join("training_metrics.csv");
        let result = std::fs::create_dir_all(&dir)
            .map_err(GanClsError::from)
            .and_then(|_| self.metrics.save_csv(&path));
        if let Err(e) = result {
            warn!("Failed to save metrics to {}: {}", path.display(), e);
        }
    }

    /// Step counter after the last update
    pub fn step(&self) -> u64 {
        self.state.as_ref().map_or(1, |state| state.step)
    }

    /// Get training metrics
    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    /// Get configuration
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }
}

/// Image and embedding sizes of the dataset must match the model
fn check_compatible(model: &GanCls, dataset: &dyn DatasetProvider) -> Result<()> {
    let size = model.output_size() as usize;
    let expected = [size, size, model.c_dim() as usize];
    if dataset.image_shape() != expected {
        return Err(GanClsError::shape(
            format!("images of dataset {}", dataset.name()),
            expected,
            dataset.image_shape(),
        ));
    }
    if dataset.embedding_dim() != model.embed_dim() as usize {
        return Err(GanClsError::shape(
            format!("embeddings of dataset {}", dataset.name()),
            model.embed_dim(),
            dataset.embedding_dim(),
        ));
    }
    Ok(())
}
