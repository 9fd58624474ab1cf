//! Token encoder implementations.

use crate::{Error, ErrorContext, Result};
use lru::LruCache;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tiktoken_rs::CoreBPE;

/// Maps a text string to the number of tokens it encodes to.
///
/// Implementations must be pure: the same text always yields the same count.
pub trait TokenEncoder: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

impl<F> TokenEncoder for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

#[derive(Debug, Clone)]
pub struct CharacterEstimator {
    chars_per_token: f64,
}
impl CharacterEstimator {
    pub fn new() -> Self {
        Self::with_ratio(4.0)
    }
    pub fn with_ratio(r: f64) -> Self {
        Self { chars_per_token: r }
    }
}
impl Default for CharacterEstimator {
    fn default() -> Self {
        Self::new()
    }
}
impl TokenEncoder for CharacterEstimator {
    fn count(&self, text: &str) -> usize {
        (text.len() as f64 / self.chars_per_token).ceil() as usize
    }
}

/// BPE encoder for the OpenAI encodings shipped with `tiktoken-rs`.
#[derive(Clone)]
pub struct TiktokenEncoder {
    name: String,
    bpe: Arc<CoreBPE>,
}

impl TiktokenEncoder {
    /// Load a named encoding (`cl100k_base`, `p50k_base`, `p50k_edit`, `r50k_base`).
    pub fn new(encoding_name: &str) -> Result<Self> {
        let loaded = match encoding_name {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "p50k_edit" => tiktoken_rs::p50k_edit(),
            "r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
            other => {
                return Err(Error::configuration_with_context(
                    format!("unknown token encoding '{}'", other),
                    ErrorContext::new()
                        .with_field_path("token_encoding_name")
                        .with_source("encoder_registry"),
                ))
            }
        };
        let bpe = loaded.map_err(|e| {
            Error::configuration_with_context(
                format!("failed to load token encoding '{}'", encoding_name),
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("encoder_registry"),
            )
        })?;
        Ok(Self {
            name: encoding_name.to_string(),
            bpe: Arc::new(bpe),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for TiktokenEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenEncoder")
            .field("name", &self.name)
            .finish()
    }
}

impl TokenEncoder for TiktokenEncoder {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Bounded LRU cache in front of another encoder.
///
/// Chat payloads repeat the same role strings and system prompts constantly,
/// so most lookups after warm-up are hits.
pub struct CachingEncoder {
    inner: Arc<dyn TokenEncoder>,
    cache: Mutex<LruCache<String, usize>>,
}

impl CachingEncoder {
    pub fn new(inner: Arc<dyn TokenEncoder>, max_size: usize) -> Self {
        let cap = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl TokenEncoder for CachingEncoder {
    fn count(&self, text: &str) -> usize {
        {
            let mut c = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(&n) = c.get(text) {
                return n;
            }
        }
        let n = self.inner.count(text);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(text.to_string(), n);
        n
    }
}

static ENCODERS: Lazy<RwLock<HashMap<String, Arc<dyn TokenEncoder>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

const ENCODER_CACHE_SIZE: usize = 4096;

/// Resolve an encoder by encoding name, sharing loaded BPE tables process-wide.
///
/// `"chars"` selects the character estimator; other names go through
/// [`TiktokenEncoder::new`].
pub fn encoder_for(encoding_name: &str) -> Result<Arc<dyn TokenEncoder>> {
    let key = encoding_name.to_lowercase();
    {
        let c = ENCODERS.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(x) = c.get(&key) {
            return Ok(x.clone());
        }
    }
    let encoder: Arc<dyn TokenEncoder> = if key == "chars" {
        Arc::new(CharacterEstimator::new())
    } else {
        let bpe: Arc<dyn TokenEncoder> = Arc::new(TiktokenEncoder::new(&key)?);
        Arc::new(CachingEncoder::new(bpe, ENCODER_CACHE_SIZE))
    };
    ENCODERS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, encoder.clone());
    Ok(encoder)
}
