// ============================================================
// Layer 6: Infrastructure Layer
// ============================================================
// File-system concerns shared by training and evaluation:
//
//   checkpoint.rs - Experiment persistence
//                   One MessagePack record per experiment id
//                   holding the best model's parameters and
//                   the JSON experiment log (hyperparameters,
//                   vocabulary, history), so evaluation can
//                   rebuild exactly the model that was trained.
//
//   metrics.rs    - Training metrics logging
//                   One CSV row per epoch (learning rate,
//                   train/valid perplexity, gradient norm).
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Records)

/// Experiment save/load and id generation
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
