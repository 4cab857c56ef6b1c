use crate::utils::expand_tilde;

/// Configuration from environment
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Directory holding the engine resources and vocabulary; empty when unset
    pub model_dir: String,
    /// Overrides `<model_dir>/clip_vocab.json`
    pub vocab_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            model_dir: std::env::var("MODEL_DIR")
                .map(|dir| expand_tilde(&dir))
                .unwrap_or_default(),
            vocab_path: std::env::var("VOCAB_PATH")
                .ok()
                .filter(|p| !p.is_empty())
                .map(|p| expand_tilde(&p)),
        }
    }
}
