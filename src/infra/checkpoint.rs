// ============================================================
// Layer 6: Experiment Store
// ============================================================
// Persists the best model of a run together with its log.
//
// What gets saved (one file per experiment id):
//   <savepath>/<id>.mpk
//     ├── model  - every learned parameter (inner backend, so
//     │            no autodiff state ends up on disk)
//     └── log    - the ExperimentLog as JSON: hyperparameters,
//                  vocabulary, criterion, per-epoch history
//
// Keeping both in one record means a model can never be loaded
// with the wrong vocabulary or architecture: the architecture is
// rebuilt from the hyperparameters stored next to the weights.
//
// The file is overwritten every time validation perplexity
// improves, so it always holds the best epoch so far.
//
// Burn's NamedMpkFileRecorder:
//   - MessagePack with field names, no compression
//   - FullPrecisionSettings keeps f32 weights as f32

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder},
};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::experiment::ExperimentLog;
use crate::ml::model::{RnnLm, RnnLmConfig, RnnLmRecord};

type StoreRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

const FILE_EXTENSION: &str = "mpk";

/// Model parameters plus the serialized experiment log.
#[derive(Record)]
pub struct ExperimentRecord<B: Backend> {
    pub model: RnnLmRecord<B>,
    pub log:   String,
}

/// `<timestamp>-<pid>-<random hex>`, used when no `--id` is given.
pub fn generate_experiment_id() -> String {
    format!(
        "{}-{}-{:06x}",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        std::process::id(),
        rand::random::<u32>() & 0x00ff_ffff,
    )
}

/// Reads and writes experiments under one directory.
pub struct ExperimentStore {
    dir: PathBuf,
}

impl ExperimentStore {
    /// Open `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create experiment directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Full path of the file experiment `id` is stored in.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.stem(id).with_extension(FILE_EXTENSION)
    }

    // The recorder appends the extension itself.
    fn stem(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).is_file()
    }

    /// Overwrite the stored experiment `log.id` with `model` and `log`.
    pub fn save<B: Backend>(&self, log: &ExperimentLog, model: &RnnLm<B>) -> Result<()> {
        let record = ExperimentRecord {
            model: model.clone().into_record(),
            log:   log.to_json()?,
        };

        StoreRecorder::new()
            .record(record, self.stem(&log.id))
            .with_context(|| {
                format!("Failed to save experiment to '{}'", self.path_for(&log.id).display())
            })?;

        tracing::debug!("Saved experiment '{}' (best epoch {:?})", log.id, log.best_epoch);
        Ok(())
    }

    /// Load experiment `id`: its log, and the model rebuilt from the
    /// logged hyperparameters with the stored weights.
    pub fn load<B: Backend>(&self, id: &str, device: &B::Device) -> Result<(ExperimentLog, RnnLm<B>)> {
        let path = self.path_for(id);

        let record: ExperimentRecord<B> = StoreRecorder::new()
            .load(self.stem(id), device)
            .with_context(|| {
                format!(
                    "Cannot load experiment '{}'. Have you run 'train' with --id {id}?",
                    path.display()
                )
            })?;

        let log = ExperimentLog::from_json(&record.log)?;
        let model = RnnLmConfig::from_train_config(&log.hyperparameters, log.vocabulary.len())
            .init::<B>(device)
            .load_record(record.model);

        tracing::info!(
            "Loaded experiment '{}' ({} epochs, best epoch {:?})",
            log.id,
            log.epochs_run(),
            log.best_epoch
        );
        Ok((log, model))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::TrainConfig;
    use crate::domain::{
        experiment::EpochMetrics, hyperparams::CellKind, vocabulary::Vocabulary,
    };
    use burn::{backend::NdArray, tensor::ElementConversion};

    type TestBackend = NdArray;

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = generate_experiment_id();
        let b = generate_experiment_id();
        assert_ne!(a, b);
        assert!(a.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_save_then_load_restores_log_and_weights() {
        let tmp   = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(tmp.path().join("runs")).unwrap();

        let cfg = TrainConfig {
            id:           "roundtrip".to_string(),
            cell:         CellKind::Lstm,
            input_size:   4,
            hidden_sizes: vec![3],
            ..TrainConfig::default()
        };
        let vocab   = Vocabulary::build(["the cat sat", "the dog ran"]);
        let mut log = ExperimentLog::new(cfg.clone(), vocab.clone());
        log.record(EpochMetrics {
            epoch: 1, learning_rate: 0.05, train_ppl: 90.0, valid_ppl: 80.0, mean_grad_norm: Some(1.5),
        });

        let device = Default::default();
        let model  = RnnLmConfig::from_train_config(&cfg, vocab.len()).init::<TestBackend>(&device);
        store.save(&log, &model).unwrap();
        assert!(store.exists("roundtrip"));
        assert!(!store.exists("missing"));

        let (loaded_log, loaded) = store.load::<TestBackend>("roundtrip", &device).unwrap();
        assert_eq!(loaded_log.history, log.history);
        assert_eq!(loaded_log.hyperparameters, cfg);
        assert_eq!(loaded_log.vocabulary.id("dog"), vocab.id("dog"));

        let before = model.output.weight.val();
        let after  = loaded.output.weight.val();
        let diff: f32 = (before - after).abs().max().into_scalar().elem();
        assert!(diff < 1e-7);
    }

    #[test]
    fn test_loading_unknown_id_fails() {
        let tmp   = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(tmp.path()).unwrap();
        assert!(store.load::<TestBackend>("nope", &Default::default()).is_err());
    }
}
