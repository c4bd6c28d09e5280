use std::path::Path;

use tokenizers::tokenizer::Tokenizer as HfTokenizer;

/// String to token ids over a fixed vocabulary.
///
/// The renderer only ever calls `encode`; it never trains or swaps the
/// vocabulary behind it.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError>;
}

/// GPT-2 byte-level BPE, backed by the HuggingFace `tokenizers` crate.
pub struct Gpt2Tokenizer {
    tokenizer: HfTokenizer,
}

impl Gpt2Tokenizer {
    /// Fetch a pretrained tokenizer from the HuggingFace hub, e.g. `"gpt2"`.
    pub fn from_pretrained(identifier: &str) -> Result<Self, TokenizerError> {
        let tokenizer =
            HfTokenizer::from_pretrained(identifier, None).map_err(TokenizerError::Load)?;
        Ok(Self { tokenizer })
    }

    /// Load a `tokenizer.json` from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        let tokenizer = HfTokenizer::from_file(path).map_err(TokenizerError::Load)?;
        Ok(Self { tokenizer })
    }

    /// Treats `source` as a path when it names an existing file, otherwise as
    /// a hub identifier.
    pub fn load(source: &str) -> Result<Self, TokenizerError> {
        if Path::new(source).is_file() {
            Self::from_file(source)
        } else {
            Self::from_pretrained(source)
        }
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}

impl Tokenizer for Gpt2Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        // GPT-2 has no BOS/EOS post-processing; ids must match the raw BPE.
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(TokenizerError::Encode)?;
        Ok(encoding.get_ids().to_vec())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error("failed to load tokenizer: {0}")]
    Load(#[source] tokenizers::Error),
    #[error("failed to encode text: {0}")]
    Encode(#[source] tokenizers::Error),
}
