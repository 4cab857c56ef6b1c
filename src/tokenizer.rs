//! CLIP-style greedy sub-word tokenizer
//!
//! Maps prompt text to the fixed 77-token context the text encoder expects.
//! Words found in the vocabulary map to a single id; other words are split
//! into the longest known prefixes, left to right.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::error::PipelineError;
use crate::tensor::TokenTensor;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid vocabulary file format: {0}")]
    InvalidVocab(#[from] serde_json::Error),

    #[error("Token id {id} for {token:?} exceeds the i32 id range")]
    IdOutOfRange { token: String, id: u32 },
}

impl From<TokenizerError> for PipelineError {
    fn from(err: TokenizerError) -> Self {
        PipelineError::resource_load("vocabulary", err)
    }
}

/// Special token IDs
pub const START_OF_TEXT: i32 = 49406;
pub const END_OF_TEXT: i32 = 49407;
pub const PAD: i32 = 0;

/// Fixed context length of the text encoder
pub const MAX_TOKENS: usize = 77;

/// Greedy longest-prefix tokenizer over a fixed vocabulary
#[derive(Debug, Clone)]
pub struct ClipTokenizer {
    vocab: HashMap<String, i32>,
    decoder: HashMap<i32, String>,
}

impl ClipTokenizer {
    /// Load a `{"token": id}` JSON vocabulary file
    pub fn from_file<P: AsRef<Path>>(vocab_path: P) -> Result<Self, TokenizerError> {
        let content = fs::read_to_string(vocab_path)?;
        Self::from_json(&content)
    }

    /// Parse a `{"token": id}` JSON vocabulary
    pub fn from_json(content: &str) -> Result<Self, TokenizerError> {
        let vocab: HashMap<String, u32> = serde_json::from_str(content)?;
        Self::from_vocab(vocab)
    }

    /// Build from an in-memory vocabulary
    ///
    /// Fails if an id does not fit the encoder's i32 token type.
    pub fn from_vocab<I, S>(vocab: I) -> Result<Self, TokenizerError>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let vocab = vocab
            .into_iter()
            .map(|(token, id)| {
                let token = token.into();
                match i32::try_from(id) {
                    Ok(id) => Ok((token, id)),
                    Err(_) => Err(TokenizerError::IdOutOfRange { token, id }),
                }
            })
            .collect::<Result<HashMap<String, i32>, _>>()?;
        let decoder = vocab.iter().map(|(k, &v)| (v, k.clone())).collect();
        Ok(Self { vocab, decoder })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Encode text into exactly `MAX_TOKENS` ids
    ///
    /// Never fails: unknown characters are dropped, and the result is padded
    /// or truncated. Truncation keeps the first `MAX_TOKENS` ids, so a long
    /// prompt loses its end token.
    pub fn encode(&self, text: &str) -> Vec<i32> {
        let mut tokens = vec![START_OF_TEXT];

        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        for word in normalized.split(' ').filter(|w| !w.is_empty()) {
            match self.vocab.get(word) {
                Some(&id) => tokens.push(id),
                None => tokens.extend(self.split_into_subwords(word)),
            }
        }

        tokens.push(END_OF_TEXT);
        tokens.resize(MAX_TOKENS, PAD);
        tokens
    }

    /// Encode text as the `[1, 77]` tensor fed to the text encoder
    pub fn encode_tensor(&self, text: &str) -> TokenTensor {
        let ids = self.encode(text);
        TokenTensor::new(ids, &[1, MAX_TOKENS]).expect("encode always yields MAX_TOKENS ids")
    }

    /// Map ids back to vocabulary entries, skipping special tokens
    pub fn decode(&self, tokens: &[i32]) -> String {
        tokens
            .iter()
            .filter(|&&id| id != START_OF_TEXT && id != END_OF_TEXT && id != PAD)
            .filter_map(|id| self.decoder.get(id))
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Greedy longest-prefix segmentation of an out-of-vocabulary word
    fn split_into_subwords(&self, word: &str) -> Vec<i32> {
        let mut tokens = Vec::new();
        let mut rest = word;

        while !rest.is_empty() {
            // Char boundaries after each prefix, longest first
            let mut ends: Vec<usize> = rest
                .char_indices()
                .map(|(i, c)| i + c.len_utf8())
                .collect();
            ends.reverse();

            let matched = ends
                .into_iter()
                .find_map(|end| self.vocab.get(&rest[..end]).map(|&id| (end, id)));

            match matched {
                Some((end, id)) => {
                    tokens.push(id);
                    rest = &rest[end..];
                }
                None => {
                    // Unknown leading character contributes no token
                    let skip = rest.chars().next().map_or(rest.len(), char::len_utf8);
                    rest = &rest[skip..];
                }
            }
        }

        if tokens.is_empty() {
            vec![END_OF_TEXT]
        } else {
            tokens
        }
    }
}
