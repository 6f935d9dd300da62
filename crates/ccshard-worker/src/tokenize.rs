//! Tokenizer contract and the HuggingFace `tokenizers` binding

use std::path::Path;

/// Tokenizer failure (load or encode)
#[derive(Debug, Clone)]
pub struct TokenizeError {
    pub message: String,
}

impl TokenizeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tokenizer: {}", self.message)
    }
}

impl std::error::Error for TokenizeError {}

/// Text to token ids, without special tokens.
pub trait Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizeError>;

    /// Identity recorded in sample metadata
    fn name(&self) -> &str;

    /// End-of-sequence token id recorded in sample metadata
    fn eos_id(&self) -> Option<u32>;
}

impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizeError> {
        (**self).encode(text)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn eos_id(&self) -> Option<u32> {
        (**self).eos_id()
    }
}

/// Tokenizer loaded from a `tokenizer.json` file.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    name: String,
    eos_id: Option<u32>,
}

impl HfTokenizer {
    /// Load `path`, resolving `eos_token` (e.g. `<|endoftext|>`) in its vocab.
    pub fn from_file(path: &Path, name: &str, eos_token: &str) -> Result<Self, TokenizeError> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            TokenizeError::new(format!("cannot load '{}': {e}", path.display()))
        })?;
        let eos_id = inner.token_to_id(eos_token);
        if eos_id.is_none() {
            log::warn!("EOS token {eos_token:?} not in vocabulary of {name}");
        }
        log::info!(
            "Loaded tokenizer {name} ({} tokens) from {}",
            inner.get_vocab_size(true),
            path.display()
        );
        Ok(Self {
            inner,
            name: name.to_string(),
            eos_id,
        })
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizeError> {
        self.inner
            .encode(text, false)
            .map(|encoding| encoding.get_ids().to_vec())
            .map_err(|e| TokenizeError::new(format!("encode failed: {e}")))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Word-level tokenizer JSON with a tiny vocabulary.
    const TOKENIZER_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"<unk>": 0, "hello": 1, "world": 2, "<|endoftext|>": 3},
            "unk_token": "<unk>"
        }
    }"#;

    fn load(eos: &str) -> HfTokenizer {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(&path, TOKENIZER_JSON).unwrap();
        HfTokenizer::from_file(&path, "test-wordlevel", eos).unwrap()
    }

    #[test]
    fn encodes_without_special_tokens() {
        let tok = load("<|endoftext|>");
        assert_eq!(tok.encode("hello world hello").unwrap(), vec![1, 2, 1]);
        assert_eq!(tok.encode("hello nope").unwrap(), vec![1, 0]);
        assert_eq!(tok.name(), "test-wordlevel");
        assert_eq!(tok.eos_id(), Some(3));
    }

    #[test]
    fn unknown_eos_is_none() {
        assert_eq!(load("</s>").eos_id(), None);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = HfTokenizer::from_file(Path::new("/nonexistent/tokenizer.json"), "x", "</s>")
            .err()
            .unwrap();
        assert!(err.message.contains("cannot load"));
    }
}
