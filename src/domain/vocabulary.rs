// ============================================================
// Layer 3: Vocabulary
// ============================================================
// Word-level mapping between tokens and integer ids.
//
// Ids are assigned in order of first appearance, after the two
// reserved tokens:
//   0 → <unk>   words never seen while building the vocabulary
//   1 → <eos>   appended at the end of every line
//
// The vocabulary is stored inside the experiment log so a saved
// model can always be decoded back to words.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const UNK_TOKEN: &str = "<unk>";
pub const EOS_TOKEN: &str = "<eos>";

const UNK_ID: u32 = 0;
const EOS_ID: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    id_to_word: Vec<String>,
    #[serde(skip)]
    word_to_id: HashMap<String, u32>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let mut vocab = Self { id_to_word: Vec::new(), word_to_id: HashMap::new() };
        vocab.insert(UNK_TOKEN);
        vocab.insert(EOS_TOKEN);
        vocab
    }
}

impl Vocabulary {
    /// Build a vocabulary from whitespace-tokenised lines.
    pub fn build<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut vocab = Self::default();
        for line in lines {
            for word in line.split_whitespace() {
                vocab.insert(word);
            }
        }
        vocab
    }

    fn insert(&mut self, word: &str) -> u32 {
        if let Some(&id) = self.word_to_id.get(word) {
            return id;
        }
        let id = self.id_to_word.len() as u32;
        self.id_to_word.push(word.to_string());
        self.word_to_id.insert(word.to_string(), id);
        id
    }

    /// Restore the reverse index after deserialisation.
    pub fn reindex(mut self) -> Self {
        self.word_to_id = self
            .id_to_word
            .iter()
            .enumerate()
            .map(|(id, word)| (word.clone(), id as u32))
            .collect();
        self
    }

    pub fn len(&self) -> usize {
        self.id_to_word.len()
    }

    pub fn unk_id(&self) -> u32 {
        UNK_ID
    }

    pub fn eos_id(&self) -> u32 {
        EOS_ID
    }

    pub fn id(&self, word: &str) -> u32 {
        self.word_to_id.get(word).copied().unwrap_or_else(|| self.unk_id())
    }

    pub fn word(&self, id: u32) -> Option<&str> {
        self.id_to_word.get(id as usize).map(String::as_str)
    }

    /// Encode one line, appending `<eos>`.
    pub fn encode_line(&self, line: &str) -> Vec<u32> {
        line.split_whitespace()
            .map(|w| self.id(w))
            .chain(std::iter::once(self.eos_id()))
            .collect()
    }

    /// Decode ids back to text; `<eos>` becomes a newline.
    pub fn decode(&self, ids: &[u32]) -> String {
        let mut out = String::new();
        for &id in ids {
            match self.word(id) {
                Some(EOS_TOKEN) => out.push('\n'),
                Some(word) => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push(' ');
                    }
                    out.push_str(word);
                }
                None => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_tokens_come_first() {
        let vocab = Vocabulary::build(["the cat", "the dog"]);
        assert_eq!(vocab.unk_id(), 0);
        assert_eq!(vocab.eos_id(), 1);
        assert_eq!(vocab.len(), 5);
        assert_eq!(vocab.id("the"), 2);
    }

    #[test]
    fn test_corpus_unk_is_not_duplicated() {
        let vocab = Vocabulary::build(["a <unk> b"]);
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.id("<unk>"), vocab.unk_id());
    }

    #[test]
    fn test_encode_maps_unknown_and_appends_eos() {
        let vocab = Vocabulary::build(["the cat"]);
        let ids   = vocab.encode_line("the zebra");
        assert_eq!(ids, vec![vocab.id("the"), vocab.unk_id(), vocab.eos_id()]);
    }

    #[test]
    fn test_decode_round_trips_words() {
        let vocab = Vocabulary::build(["the cat sat"]);
        let ids   = vocab.encode_line("the cat sat");
        assert_eq!(vocab.decode(&ids), "the cat sat\n");
    }

    #[test]
    fn test_reindex_after_json() {
        let vocab   = Vocabulary::build(["hello world"]);
        let json    = serde_json::to_string(&vocab).unwrap();
        let restored: Vocabulary = serde_json::from_str(&json).unwrap();
        let restored = restored.reindex();
        assert_eq!(restored, vocab);
        assert_eq!(restored.id("world"), vocab.id("world"));
    }
}
