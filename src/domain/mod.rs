// ============================================================
// Layer 3: Domain Layer
// ============================================================
// Plain Rust structs, enums and traits that define what a
// training run IS, independent of burn:
//
//   hyperparams - typed cell / optimizer / state-policy choices
//   schedule    - the per-epoch learning-rate rule
//   vocabulary  - word ↔ id mapping
//   experiment  - per-epoch metrics and the experiment log
//   traits      - CorpusProvider and EpochRunner seams
//
// Nothing here needs a tensor backend, so all of it is unit
// tested without a device.

pub mod hyperparams;

pub mod schedule;

pub mod vocabulary;

pub mod experiment;

pub mod traits;
