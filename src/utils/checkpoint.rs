//! Checkpoint save/load utilities
//!
//! Snapshots live in a directory keyed by model identity, so runs with
//! incompatible configurations never read each other's parameters:
//!
//! ```text
//! <root>/GANCLS/<dataset>_<batch>_<output>/GANCLS-<step>.generator.ot
//!                                         /GANCLS-<step>.discriminator.ot
//!                                         /GANCLS-<step>.gen_opt.ot
//!                                         /GANCLS-<step>.disc_opt.ot
//!                                         /GANCLS-<step>.json
//! ```
//!
//! The optimizer files hold Adam moments and are written when a training
//! state is saved with the parameters.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GanClsError, Result};
use crate::model::GanCls;
use crate::training::{Adam, TrainingState};

const GENERATOR_SUFFIX: &str = ".generator.ot";
const DISCRIMINATOR_SUFFIX: &str = ".discriminator.ot";
const GEN_OPT_SUFFIX: &str = ".gen_opt.ot";
const DISC_OPT_SUFFIX: &str = ".disc_opt.ot";
const META_SUFFIX: &str = ".json";
const SNAPSHOT_SUFFIXES: [&str; 5] = [
    GENERATOR_SUFFIX,
    DISCRIMINATOR_SUFFIX,
    GEN_OPT_SUFFIX,
    DISC_OPT_SUFFIX,
    META_SUFFIX,
];

/// Final integer run of a checkpoint name
static STEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\D*$").expect("Invalid checkpoint step regex"));

/// Fields that make two checkpoints compatible
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub model_name: String,
    pub dataset_name: String,
    pub batch_size: usize,
    pub output_size: usize,
}

impl ModelIdentity {
    pub fn new(dataset_name: impl Into<String>, batch_size: usize, output_size: usize) -> Self {
        Self {
            model_name: "GANCLS".to_string(),
            dataset_name: dataset_name.into(),
            batch_size,
            output_size,
        }
    }

    /// `<dataset>_<batch>_<output>`
    pub fn dir_name(&self) -> String {
        format!("{}_{}_{}", self.dataset_name, self.batch_size, self.output_size)
    }
}

/// Checkpoint metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Step counter at save time
    pub step: u64,
    /// Epoch within the run that saved it
    pub epoch: usize,
    /// Discriminator loss at checkpoint
    pub d_loss: f64,
    /// Generator loss at checkpoint
    pub g_loss: f64,
    /// Timestamp of checkpoint
    pub timestamp: String,
    /// Model configuration
    pub config: serde_json::Value,
}

impl CheckpointMeta {
    pub fn new(step: u64, epoch: usize, d_loss: f64, g_loss: f64, config: serde_json::Value) -> Self {
        Self {
            step,
            epoch,
            d_loss,
            g_loss,
            timestamp: chrono::Utc::now().to_rfc3339(),
            config,
        }
    }
}

/// Saves and restores parameter snapshots of a `GanCls`
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    root: PathBuf,
    identity: ModelIdentity,
    max_to_keep: usize,
}

impl CheckpointManager {
    /// `max_to_keep == 0` keeps every snapshot
    pub fn new<P: Into<PathBuf>>(root: P, identity: ModelIdentity, max_to_keep: usize) -> Self {
        Self {
            root: root.into(),
            identity,
            max_to_keep,
        }
    }

    pub fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    /// Directory holding this model's snapshots
    pub fn model_dir(&self) -> PathBuf {
        self.root
            .join(&self.identity.model_name)
            .join(self.identity.dir_name())
    }

    fn prefix(&self, step: u64) -> PathBuf {
        self.model_dir()
            .join(format!("{}-{}", self.identity.model_name, step))
    }

    /// Save both parameter sets and metadata under `step`
    ///
    /// Returns the snapshot prefix. Every failure is reported as
    /// `CheckpointSave`.
    pub fn save(&self, model: &GanCls, step: u64, meta: &CheckpointMeta) -> Result<PathBuf> {
        self.save_snapshot(model, None, step, meta)
    }

    /// Save parameters, both optimizers and metadata under the state's step
    pub fn save_state(
        &self,
        model: &GanCls,
        state: &TrainingState,
        meta: &CheckpointMeta,
    ) -> Result<PathBuf> {
        self.save_snapshot(model, Some((&state.gen_opt, &state.disc_opt)), state.step, meta)
    }

    fn save_snapshot(
        &self,
        model: &GanCls,
        optimizers: Option<(&Adam, &Adam)>,
        step: u64,
        meta: &CheckpointMeta,
    ) -> Result<PathBuf> {
        let prefix = self.prefix(step);
        self.write_snapshot(model, optimizers, &prefix, meta)
            .map_err(|e| GanClsError::CheckpointSave {
                path: prefix.clone(),
                source: Box::new(e),
            })?;

        info!("Saved checkpoint {}", prefix.display());
        Ok(prefix)
    }

    fn write_snapshot(
        &self,
        model: &GanCls,
        optimizers: Option<(&Adam, &Adam)>,
        prefix: &Path,
        meta: &CheckpointMeta,
    ) -> Result<()> {
        std::fs::create_dir_all(self.model_dir())?;

        model.save(
            with_suffix(prefix, GENERATOR_SUFFIX),
            with_suffix(prefix, DISCRIMINATOR_SUFFIX),
        )?;

        if let Some((gen_opt, disc_opt)) = optimizers {
            gen_opt.save(with_suffix(prefix, GEN_OPT_SUFFIX))?;
            disc_opt.save(with_suffix(prefix, DISC_OPT_SUFFIX))?;
        }

        let meta_json = serde_json::to_string_pretty(meta)?;
        std::fs::write(with_suffix(prefix, META_SUFFIX), meta_json)?;

        self.prune()
    }

    /// Remove the oldest snapshots beyond `max_to_keep`
    fn prune(&self) -> Result<()> {
        if self.max_to_keep == 0 {
            return Ok(());
        }

        let snapshots = self.snapshots()?;
        if snapshots.len() <= self.max_to_keep {
            return Ok(());
        }

        let excess = snapshots.len() - self.max_to_keep;
        for (step, prefix) in snapshots.into_iter().take(excess) {
            debug!("Removing checkpoint at step {}", step);
            for suffix in SNAPSHOT_SUFFIXES {
                match std::fs::remove_file(with_suffix(&prefix, suffix)) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// All snapshots in the model directory as `(step, prefix)`, oldest first
    fn snapshots(&self) -> Result<Vec<(u64, PathBuf)>> {
        let dir = self.model_dir();
        if !dir.is_dir() {
            return Ok(vec![]);
        }

        let mut snapshots = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(GENERATOR_SUFFIX) else {
                continue;
            };
            if let Some(step) = parse_step(stem) {
                snapshots.push((step, dir.join(stem)));
            }
        }

        snapshots.sort_by_key(|(step, _)| *step);
        Ok(snapshots)
    }

    /// Most recent snapshot as `(prefix, step)`
    pub fn latest(&self) -> Result<Option<(PathBuf, u64)>> {
        Ok(self
            .snapshots()?
            .pop()
            .map(|(step, prefix)| (prefix, step)))
    }

    /// Restore the most recent snapshot into `model`
    ///
    /// Returns `(false, 0)` when there is nothing to restore.
    pub fn load(&self, model: &mut GanCls) -> Result<(bool, u64)> {
        info!("Reading checkpoints...");

        match self.latest()? {
            Some((prefix, step)) => {
                model.load(
                    with_suffix(&prefix, GENERATOR_SUFFIX),
                    with_suffix(&prefix, DISCRIMINATOR_SUFFIX),
                )?;
                info!("Success to read {}", prefix.display());
                Ok((true, step))
            }
            None => {
                info!("Failed to find a checkpoint");
                Ok((false, 0))
            }
        }
    }

    /// Restore the optimizer moments saved with the snapshot at `step`
    ///
    /// Returns `false`, leaving the optimizers untouched, when that
    /// snapshot carries parameters only.
    pub fn load_optimizers(&self, step: u64, gen_opt: &mut Adam, disc_opt: &mut Adam) -> Result<bool> {
        let prefix = self.prefix(step);
        let gen_path = with_suffix(&prefix, GEN_OPT_SUFFIX);
        let disc_path = with_suffix(&prefix, DISC_OPT_SUFFIX);
        if !gen_path.exists() || !disc_path.exists() {
            info!("No optimizer state in {}, moments start from zero", prefix.display());
            return Ok(false);
        }

        gen_opt.load(&gen_path)?;
        disc_opt.load(&disc_path)?;
        debug!("Restored optimizer state from {}", prefix.display());
        Ok(true)
    }

    /// Every snapshot with its metadata when readable, sorted by step
    pub fn list(&self) -> Result<Vec<(u64, PathBuf, Option<CheckpointMeta>)>> {
        Ok(self
            .snapshots()?
            .into_iter()
            .map(|(step, prefix)| {
                let meta = std::fs::read_to_string(with_suffix(&prefix, META_SUFFIX))
                    .ok()
                    .and_then(|s| serde_json::from_str(&s).ok());
                (step, prefix, meta)
            })
            .collect())
    }
}

fn parse_step(name: &str) -> Option<u64> {
    STEP_RE
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
