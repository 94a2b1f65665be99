// ============================================================
// Layer 4: Data Pipeline
// ============================================================
// Everything from text files on disk to tensor batches:
//
//   train.txt / valid.txt / test.txt
//       │
//       ▼
//   TextCorpus        → builds the vocabulary, encodes every split
//       │
//       ▼
//   SequenceBatcher   → lays a split out as parallel columns and
//       │               yields consecutive (input, target) windows
//       ▼
//   LmBatch<B>        → [batch_size, steps] tensors for the model
//
// Reference: Burn Book §4 (Datasets and Batching)

/// Loads a word-level corpus directory
pub mod corpus;

/// Ordered minibatches for truncated back-propagation through time
pub mod batcher;
