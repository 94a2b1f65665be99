// ============================================================
// Layer 4: Text Corpus
// ============================================================
// Loads a word-level corpus laid out like Penn Treebank:
//
//   <data_dir>/
//     train.txt   ← required, the vocabulary is built from it
//     valid.txt   ← required, used for early stopping
//     test.txt    ← optional, used by `rnnlm evaluate`
//
// One sentence per line, words separated by whitespace.
// Every line is terminated with <eos>; words that do not occur
// in train.txt are mapped to <unk>.

use std::{fs, path::Path};

use anyhow::{Context, Result};

use crate::domain::{
    traits::{CorpusProvider, Split},
    vocabulary::Vocabulary,
};

pub struct TextCorpus {
    vocabulary: Vocabulary,
    train:      Vec<u32>,
    valid:      Vec<u32>,
    test:       Option<Vec<u32>>,
}

impl TextCorpus {
    /// Read the splits from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        let read = |name: &str| -> Result<String> {
            let path = dir.join(name);
            fs::read_to_string(&path)
                .with_context(|| format!("Cannot read corpus file '{}'", path.display()))
        };

        let train = read("train.txt")?;
        let valid = read("valid.txt")?;
        let test  = if dir.join("test.txt").exists() { Some(read("test.txt")?) } else { None };

        let corpus = Self::from_texts(&train, &valid, test.as_deref());
        tracing::debug!(
            "Corpus '{}': {} train, {} valid, {} test tokens",
            dir.display(),
            corpus.train.len(),
            corpus.valid.len(),
            corpus.test.as_ref().map_or(0, Vec::len),
        );
        Ok(corpus)
    }

    /// Build a corpus from in-memory texts. The vocabulary comes from `train`.
    pub fn from_texts(train: &str, valid: &str, test: Option<&str>) -> Self {
        let vocabulary = Vocabulary::build(train.lines());
        let encode = |text: &str| -> Vec<u32> {
            text.lines()
                .filter(|line| !line.trim().is_empty())
                .flat_map(|line| vocabulary.encode_line(line))
                .collect()
        };

        let train = encode(train);
        let valid = encode(valid);
        let test  = test.map(encode);

        Self { vocabulary, train, valid, test }
    }

    /// Load `dir` and re-encode every split with a previously saved
    /// vocabulary, so ids line up with a trained model.
    pub fn with_vocabulary(vocabulary: Vocabulary, dir: impl AsRef<Path>) -> Result<Self> {
        let loaded = Self::load(dir)?;
        let encode_split = |ids: &[u32]| -> Vec<u32> {
            ids.iter()
                .map(|&id| loaded.vocabulary.word(id).map_or(vocabulary.unk_id(), |w| vocabulary.id(w)))
                .collect()
        };

        Ok(Self {
            train: encode_split(&loaded.train),
            valid: encode_split(&loaded.valid),
            test:  loaded.test.as_deref().map(encode_split),
            vocabulary,
        })
    }
}

impl CorpusProvider for TextCorpus {
    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    fn tokens(&self, split: Split) -> Result<&[u32]> {
        match split {
            Split::Train => Ok(&self.train),
            Split::Valid => Ok(&self.valid),
            Split::Test  => self
                .test
                .as_deref()
                .context("This corpus has no test split (test.txt is missing)"),
        }
    }
}
