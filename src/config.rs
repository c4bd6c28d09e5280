use std::{env, path::PathBuf};

use burn::config::Config;

use crate::data::DEFAULT_BASE_URL;

/// Environment variable overriding the default cache directory.
pub const CACHE_DIR_ENV: &str = "HELLASWAG_CACHE_DIR";

/// Tokenizer used when none is configured: GPT-2 BPE from the HuggingFace hub.
pub const DEFAULT_TOKENIZER: &str = "gpt2";

#[derive(Config, Debug)]
pub struct HellaSwagConfig {
    /// Where split files are cached. Falls back to `HELLASWAG_CACHE_DIR`,
    /// then the platform cache directory.
    #[config(default = "None")]
    pub cache_dir: Option<PathBuf>,
    /// Directory URL holding the `hellaswag_<split>.jsonl` files
    #[config(default = "DEFAULT_BASE_URL.to_string()")]
    pub base_url: String,
    /// Hub identifier or path to a `tokenizer.json`
    #[config(default = "DEFAULT_TOKENIZER.to_string()")]
    pub tokenizer: String,
    /// Show a progress bar while downloading
    #[config(default = true)]
    pub show_progress: bool,
    #[config(default = 30)]
    pub connect_timeout_secs: u64,
    /// No read timeout when unset
    #[config(default = "None")]
    pub read_timeout_secs: Option<u64>,
}

impl HellaSwagConfig {
    #[must_use]
    pub fn resolve_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        if let Ok(dir) = env::var(CACHE_DIR_ENV) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("hellaswag")
    }
}
