//! # Subword Encoding
//!
//! The [`TextEncoder`] seam hides the concrete tokenizer from the dataset
//! builder and the evaluation harness. [`HfTextEncoder`] wraps a Hugging Face
//! `tokenizer.json`, pads and truncates to a fixed length, and reports
//! character (not byte) offsets so they line up with the annotation spans.

use std::path::Path;

use tokenizers::{
    Encoding, PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams,
};
use tracing::debug;

use crate::align::TokenOffset;
use crate::error::{Result, TaleweaveError};
use crate::vocab::MAX_SEQ_LENGTH;

/// Token ids, attention mask and per-token character offsets for one text.
///
/// All three vectors have the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEncoding {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    /// `None` for special and padding tokens.
    pub offsets: Vec<TokenOffset>,
}

impl TokenEncoding {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Anything that turns text into fixed-length token sequences.
pub trait TextEncoder {
    /// Length of every returned encoding.
    fn max_length(&self) -> usize;

    fn encode(&self, text: &str) -> Result<TokenEncoding>;

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<TokenEncoding>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }
}

/// [`TextEncoder`] backed by the `tokenizers` crate.
pub struct HfTextEncoder {
    tokenizer: Tokenizer,
    max_length: usize,
}

impl HfTextEncoder {
    /// Load a `tokenizer.json` and configure it for `MAX_SEQ_LENGTH`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            TaleweaveError::Tokenizer(format!("failed to load {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "loaded tokenizer");
        Self::from_tokenizer(tokenizer, MAX_SEQ_LENGTH)
    }

    /// Wrap an already built tokenizer, forcing fixed padding and truncation
    /// at `max_length`.
    pub fn from_tokenizer(mut tokenizer: Tokenizer, max_length: usize) -> Result<Self> {
        let max_length = max_length.max(1);
        let pad_token = tokenizer
            .get_padding()
            .map(|p| (p.pad_id, p.pad_token.clone()))
            .or_else(|| {
                ["[PAD]", "<pad>"].iter().find_map(|token| {
                    tokenizer
                        .token_to_id(token)
                        .map(|id| (id, token.to_string()))
                })
            })
            .unwrap_or((0, "[PAD]".to_string()));

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| TaleweaveError::Tokenizer(e.to_string()))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            direction: PaddingDirection::Right,
            pad_id: pad_token.0,
            pad_token: pad_token.1,
            ..Default::default()
        }));

        Ok(Self {
            tokenizer,
            max_length,
        })
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }
}

impl TextEncoder for HfTextEncoder {
    fn max_length(&self) -> usize {
        self.max_length
    }

    fn encode(&self, text: &str) -> Result<TokenEncoding> {
        let encoding = self
            .tokenizer
            .encode_char_offsets(text, true)
            .map_err(|e| TaleweaveError::Tokenizer(format!("failed to encode text: {e}")))?;
        Ok(convert(&encoding))
    }

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<TokenEncoding>> {
        let encodings = self
            .tokenizer
            .encode_batch_char_offsets(texts.to_vec(), true)
            .map_err(|e| TaleweaveError::Tokenizer(format!("failed to encode batch: {e}")))?;
        Ok(encodings.iter().map(convert).collect())
    }
}

fn convert(encoding: &Encoding) -> TokenEncoding {
    let offsets = encoding
        .get_offsets()
        .iter()
        .zip(encoding.get_special_tokens_mask())
        .map(|(offset, special)| (*special == 0).then_some(*offset))
        .collect();

    TokenEncoding {
        input_ids: encoding.get_ids().to_vec(),
        attention_mask: encoding.get_attention_mask().to_vec(),
        offsets,
    }
}
