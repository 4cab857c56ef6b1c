//! Locating model resources on disk
//!
//! A model directory holds one entry per engine plus the tokenizer
//! vocabulary:
//!
//! ```text
//! <model_dir>/
//!   text_encoder[.*]   file or directory
//!   unet[.*]           file or directory
//!   decoder[.*]        file or directory
//!   clip_vocab.json
//!   model.json         optional manifest
//! ```
//!
//! HuggingFace-style cache layouts (`snapshots/<hash>/`) are resolved first.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::tokenizer::MAX_TOKENS;

pub const TEXT_ENCODER_RESOURCE: &str = "text_encoder";
pub const UNET_RESOURCE: &str = "unet";
pub const DECODER_RESOURCE: &str = "decoder";
pub const VOCAB_RESOURCE: &str = "clip_vocab.json";
const MANIFEST_RESOURCE: &str = "model.json";

/// Optional `model.json` describing the conditioning produced by the text encoder
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelManifest {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_context_length")]
    pub context_length: usize,
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
}

fn default_name() -> String {
    "stable-diffusion-v1-5".to_string()
}

fn default_context_length() -> usize {
    MAX_TOKENS
}

fn default_hidden_size() -> usize {
    768
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            name: default_name(),
            context_length: default_context_length(),
            hidden_size: default_hidden_size(),
        }
    }
}

/// Resolved paths of everything a pipeline loads at construction
#[derive(Debug, Clone)]
pub struct ModelResources {
    pub model_dir: PathBuf,
    /// Engine weight entries, file or directory; backends choose the format
    pub text_encoder: PathBuf,
    pub unet: PathBuf,
    pub decoder: PathBuf,
    pub vocab: PathBuf,
    pub manifest: ModelManifest,
}

impl ModelResources {
    /// Resolve all resources under `model_dir`
    ///
    /// `vocab_override` replaces `<model_dir>/clip_vocab.json` when set.
    pub fn locate(model_dir: &Path, vocab_override: Option<&Path>) -> Result<Self> {
        if !model_dir.is_dir() {
            return Err(PipelineError::resource_load(
                model_dir.display().to_string(),
                "model directory not found",
            ));
        }
        let model_dir = crate::utils::resolve_hf_snapshot(model_dir)
            .map_err(|e| PipelineError::resource_load(model_dir.display().to_string(), e))?;

        let text_encoder = find_entry(&model_dir, TEXT_ENCODER_RESOURCE)?;
        let unet = find_entry(&model_dir, UNET_RESOURCE)?;
        let decoder = find_entry(&model_dir, DECODER_RESOURCE)?;

        let vocab = match vocab_override {
            Some(path) => path.to_path_buf(),
            None => model_dir.join(VOCAB_RESOURCE),
        };
        if !vocab.is_file() {
            return Err(PipelineError::resource_load(
                vocab.display().to_string(),
                "vocabulary not found",
            ));
        }

        let manifest_path = model_dir.join(MANIFEST_RESOURCE);
        let manifest = if manifest_path.is_file() {
            let content = std::fs::read_to_string(&manifest_path)
                .map_err(|e| PipelineError::resource_load(manifest_path.display().to_string(), e))?;
            serde_json::from_str(&content)
                .map_err(|e| PipelineError::resource_load(manifest_path.display().to_string(), e))?
        } else {
            ModelManifest::default()
        };

        if manifest.context_length != MAX_TOKENS {
            return Err(PipelineError::resource_load(
                manifest_path.display().to_string(),
                format!(
                    "context_length {} does not match tokenizer length {}",
                    manifest.context_length, MAX_TOKENS
                ),
            ));
        }

        tracing::info!(
            "Located model '{}' in {:?} (hidden_size={})",
            manifest.name,
            model_dir,
            manifest.hidden_size
        );

        Ok(Self {
            model_dir,
            text_encoder,
            unet,
            decoder,
            vocab,
            manifest,
        })
    }
}

/// Find `<dir>/<stem>` or `<dir>/<stem>.<ext>`
fn find_entry(dir: &Path, stem: &str) -> Result<PathBuf> {
    let exact = dir.join(stem);
    if exact.exists() {
        return Ok(exact);
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|e| PipelineError::resource_load(dir.display().to_string(), e))?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.file_stem().and_then(|s| s.to_str()) == Some(stem))
        .ok_or_else(|| {
            PipelineError::resource_load(
                dir.join(stem).display().to_string(),
                format!("{} resource not found", stem),
            )
        })
}
