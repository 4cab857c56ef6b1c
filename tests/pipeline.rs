//! End-to-end orchestration scenarios with recording engines

use std::sync::{Arc, Mutex};

use diffusion_api::engines::{self, Engines, LatentDecoder, ModelResources, NoisePredictor, TextEncoder};
use diffusion_api::tensor::{Tensor, TokenTensor};
use diffusion_api::tokenizer::{ClipTokenizer, MAX_TOKENS, START_OF_TEXT};
use diffusion_api::{GenerationConfig, GenerationStatus, PipelineError, StableDiffusionPipeline};

const HIDDEN: usize = 8;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Encode(Vec<i32>),
    Predict(usize),
    Decode(Vec<f32>),
}

type CallLog = Arc<Mutex<Vec<Call>>>;

#[derive(Clone, Copy)]
enum EncoderBehavior {
    Embed,
    /// Fail for prompts whose first word has this id
    FailFor(i32),
    /// Return a narrower embedding for prompts whose first word has this id
    NarrowFor(i32),
}

struct RecordingEncoder {
    log: CallLog,
    behavior: EncoderBehavior,
}

impl TextEncoder for RecordingEncoder {
    fn encode(&self, tokens: &TokenTensor) -> diffusion_api::error::Result<Tensor> {
        self.log.lock().unwrap().push(Call::Encode(tokens.data().to_vec()));
        let first_word = tokens.data()[1];
        match self.behavior {
            EncoderBehavior::FailFor(id) if id == first_word => {
                Err(PipelineError::inference("text_encoder", "out of memory"))
            }
            EncoderBehavior::NarrowFor(id) if id == first_word => {
                Ok(Tensor::full(&[1, MAX_TOKENS, HIDDEN / 2], 0.1))
            }
            _ => Ok(Tensor::full(&[1, MAX_TOKENS, HIDDEN], 0.1)),
        }
    }
}

#[derive(Clone, Copy)]
enum UnetBehavior {
    Zeros,
    FailOnCall(usize),
    WrongShape,
}

struct RecordingUnet {
    log: CallLog,
    behavior: UnetBehavior,
}

impl NoisePredictor for RecordingUnet {
    fn predict(&self, latent: &Tensor, timestep: usize, _conditioning: &Tensor) -> diffusion_api::error::Result<Tensor> {
        let mut log = self.log.lock().unwrap();
        log.push(Call::Predict(timestep));
        let call = log.iter().filter(|c| matches!(c, Call::Predict(_))).count();
        drop(log);

        match self.behavior {
            UnetBehavior::Zeros => Ok(Tensor::zeros(latent.shape())),
            UnetBehavior::FailOnCall(n) if call == n => Err(PipelineError::inference("unet", "device lost")),
            UnetBehavior::FailOnCall(_) => Ok(Tensor::zeros(latent.shape())),
            UnetBehavior::WrongShape => Ok(Tensor::zeros(&[1, 4, 2, 2])),
        }
    }
}

struct RecordingDecoder {
    log: CallLog,
    scale: usize,
}

impl LatentDecoder for RecordingDecoder {
    fn decode(&self, latent: &Tensor) -> diffusion_api::error::Result<Tensor> {
        self.log.lock().unwrap().push(Call::Decode(latent.data().to_vec()));
        let shape = latent.shape();
        Ok(Tensor::zeros(&[shape[0], 3, shape[2] * self.scale, shape[3] * self.scale]))
    }
}

const A: i32 = 320;
const BLURRY: i32 = 20887;

fn tokenizer() -> ClipTokenizer {
    ClipTokenizer::from_vocab([
        ("a", 320u32),
        ("photo", 1125),
        ("of", 539),
        ("cat", 2368),
        ("blurry", 20887),
    ])
    .unwrap()
}

fn pipeline_with(behavior: UnetBehavior, decoder_scale: usize) -> (StableDiffusionPipeline, CallLog) {
    pipeline_with_encoder(EncoderBehavior::Embed, behavior, decoder_scale)
}

fn pipeline_with_encoder(
    encoder: EncoderBehavior,
    behavior: UnetBehavior,
    decoder_scale: usize,
) -> (StableDiffusionPipeline, CallLog) {
    let log: CallLog = Arc::default();
    let engines = Engines::new(
        RecordingEncoder {
            log: log.clone(),
            behavior: encoder,
        },
        RecordingUnet {
            log: log.clone(),
            behavior,
        },
        RecordingDecoder {
            log: log.clone(),
            scale: decoder_scale,
        },
    );
    (StableDiffusionPipeline::new(tokenizer(), engines), log)
}

fn config(steps: usize, width: u32, height: u32, seed: u32) -> GenerationConfig {
    GenerationConfig {
        steps,
        batch_size: 1,
        width,
        height,
        seed,
    }
}

fn predicts(log: &CallLog) -> Vec<usize> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|c| match c {
            Call::Predict(t) => Some(*t),
            _ => None,
        })
        .collect()
}

fn decodes(log: &CallLog) -> Vec<Vec<f32>> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|c| match c {
            Call::Decode(latent) => Some(latent.clone()),
            _ => None,
        })
        .collect()
}

fn encodes(log: &CallLog) -> Vec<Vec<i32>> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|c| match c {
            Call::Encode(tokens) => Some(tokens.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_twenty_steps_then_one_decode() {
    let (mut pipeline, log) = pipeline_with(UnetBehavior::Zeros, 8);
    let images = pipeline
        .generate("a photo of a cat", None, &config(20, 512, 512, 42))
        .unwrap();

    assert_eq!(images.len(), 1);
    assert_eq!((images[0].width, images[0].height), (512, 512));
    assert_eq!(images[0].pixels.len(), 512 * 512 * 3);

    let expected: Vec<usize> = (0..20).map(|i| 999 - 20 * i).collect();
    assert_eq!(predicts(&log), expected);
    assert_eq!(decodes(&log).len(), 1);

    // Decode comes after every predict
    let calls = log.lock().unwrap();
    assert!(matches!(calls.last(), Some(Call::Decode(_))));
}

#[test]
fn test_prompt_is_tokenized_for_encoder() {
    let (mut pipeline, log) = pipeline_with(UnetBehavior::Zeros, 8);
    pipeline.generate("a photo of a cat", None, &config(1, 64, 64, 1)).unwrap();

    let encoded = encodes(&log);
    assert_eq!(encoded.len(), 1);
    assert_eq!(encoded[0].len(), MAX_TOKENS);
    assert_eq!(encoded[0][0], START_OF_TEXT);
    assert_eq!(&encoded[0][1..6], &[320, 1125, 539, 320, 2368]);
}

#[test]
fn test_non_square_size() {
    let (mut pipeline, _log) = pipeline_with(UnetBehavior::Zeros, 8);
    let images = pipeline
        .generate("a photo of a cat", None, &config(5, 768, 512, 7))
        .unwrap();
    assert_eq!((images[0].width, images[0].height), (768, 512));
}

#[test]
fn test_batch_yields_one_image_each() {
    let (mut pipeline, _log) = pipeline_with(UnetBehavior::Zeros, 8);
    let config = GenerationConfig {
        batch_size: 3,
        ..config(2, 64, 64, 5)
    };
    let images = pipeline.generate("a cat", None, &config).unwrap();
    assert_eq!(images.len(), 3);
}

#[test]
fn test_predictor_failure_aborts_without_decode() {
    let (mut pipeline, log) = pipeline_with(UnetBehavior::FailOnCall(5), 8);
    let err = pipeline
        .generate("a photo of a cat", None, &config(20, 512, 512, 42))
        .unwrap_err();

    assert!(matches!(err, PipelineError::Inference { stage: "unet", .. }));
    assert_eq!(predicts(&log).len(), 5);
    assert!(decodes(&log).is_empty());
}

#[test]
fn test_predictor_wrong_shape() {
    let (mut pipeline, log) = pipeline_with(UnetBehavior::WrongShape, 8);
    let err = pipeline
        .generate("a cat", None, &config(10, 512, 512, 42))
        .unwrap_err();

    assert!(matches!(err, PipelineError::ShapeMismatch { stage: "unet", .. }));
    assert_eq!(predicts(&log).len(), 1);
    assert!(decodes(&log).is_empty());
}

#[test]
fn test_decoder_wrong_size() {
    let (mut pipeline, _log) = pipeline_with(UnetBehavior::Zeros, 4);
    let err = pipeline
        .generate("a cat", None, &config(2, 512, 512, 42))
        .unwrap_err();
    assert!(matches!(err, PipelineError::ShapeMismatch { stage: "decoder", .. }));
}

#[test]
fn test_same_seed_same_latents() {
    let run = |seed| {
        let (mut pipeline, log) = pipeline_with(UnetBehavior::Zeros, 8);
        pipeline.generate("a cat", None, &config(3, 64, 64, seed)).unwrap();
        decodes(&log).remove(0)
    };

    let first = run(42);
    assert_eq!(first, run(42));
    assert_ne!(first, run(43));
}

#[test]
fn test_seed_zero_is_random() {
    let run = || {
        let (mut pipeline, log) = pipeline_with(UnetBehavior::Zeros, 8);
        pipeline.generate("a cat", None, &config(1, 64, 64, 0)).unwrap();
        decodes(&log).remove(0)
    };
    assert_ne!(run(), run());
}

#[test]
fn test_negative_prompt_is_encoded() {
    let (mut pipeline, log) = pipeline_with(UnetBehavior::Zeros, 8);
    pipeline
        .generate("a photo of a cat", Some("blurry"), &config(2, 64, 64, 42))
        .unwrap();

    let mut encoded = encodes(&log);
    assert_eq!(encoded.len(), 2);
    encoded.sort_by_key(|tokens| tokens[1]);
    assert_eq!(encoded[0][1], A);
    assert_eq!(encoded[1][1], BLURRY);
    assert_eq!(predicts(&log).len(), 2);
}

fn assert_no_denoising(log: &CallLog) {
    assert!(predicts(log).is_empty());
    assert!(decodes(log).is_empty());
}

#[test]
fn test_prompt_encoder_failure_aborts() {
    let (mut pipeline, log) = pipeline_with_encoder(EncoderBehavior::FailFor(A), UnetBehavior::Zeros, 8);
    let err = pipeline
        .generate("a photo of a cat", Some("blurry"), &config(20, 64, 64, 42))
        .unwrap_err();

    assert!(matches!(err, PipelineError::Inference { stage: "text_encoder", .. }));
    // Both branches were joined before the error surfaced
    assert_eq!(encodes(&log).len(), 2);
    assert_no_denoising(&log);
}

#[test]
fn test_negative_encoder_failure_aborts() {
    let (mut pipeline, log) = pipeline_with_encoder(EncoderBehavior::FailFor(BLURRY), UnetBehavior::Zeros, 8);
    let err = pipeline
        .generate("a photo of a cat", Some("blurry"), &config(20, 64, 64, 42))
        .unwrap_err();

    assert!(matches!(err, PipelineError::Inference { stage: "text_encoder", .. }));
    assert_no_denoising(&log);

    // Without the negative prompt the same pipeline succeeds
    assert!(pipeline.generate("a photo of a cat", None, &config(1, 64, 64, 42)).is_ok());
}

#[test]
fn test_negative_conditioning_shape_must_match() {
    let (mut pipeline, log) = pipeline_with_encoder(EncoderBehavior::NarrowFor(BLURRY), UnetBehavior::Zeros, 8);
    let err = pipeline
        .generate("a photo of a cat", Some("blurry"), &config(20, 64, 64, 42))
        .unwrap_err();

    match err {
        PipelineError::ShapeMismatch { stage, expected, actual } => {
            assert_eq!(stage, "text_encoder");
            assert_eq!(expected, vec![1, MAX_TOKENS, HIDDEN]);
            assert_eq!(actual, vec![1, MAX_TOKENS, HIDDEN / 2]);
        }
        other => panic!("expected shape mismatch, got {:?}", other),
    }
    assert_no_denoising(&log);
}

#[test]
fn test_invalid_config_touches_no_engine() {
    let (mut pipeline, log) = pipeline_with(UnetBehavior::Zeros, 8);
    let oversized = GenerationConfig {
        batch_size: usize::MAX / 4,
        ..config(1, 512, 512, 1)
    };
    for bad in [config(0, 512, 512, 1), config(51, 512, 512, 1), config(10, 500, 512, 1), oversized] {
        let err = pipeline.generate("a cat", None, &bad).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_progress_events() {
    let (mut pipeline, _log) = pipeline_with(UnetBehavior::Zeros, 8);
    let mut events = Vec::new();
    pipeline
        .generate_with_progress("a cat", None, &config(4, 64, 64, 3), |e| events.push(e.clone()))
        .unwrap();

    let statuses: Vec<GenerationStatus> = events.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            GenerationStatus::Encoding,
            GenerationStatus::Denoising,
            GenerationStatus::Denoising,
            GenerationStatus::Denoising,
            GenerationStatus::Denoising,
            GenerationStatus::Decoding,
            GenerationStatus::Complete,
        ]
    );
    let steps: Vec<usize> = events[1..5].iter().map(|e| e.step).collect();
    assert_eq!(steps, vec![1, 2, 3, 4]);
    assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
    assert_eq!(events.last().unwrap().progress, 1.0);
}

#[test]
fn test_failure_event_reports_completed_steps() {
    let (mut pipeline, _log) = pipeline_with(UnetBehavior::FailOnCall(3), 8);
    let mut events = Vec::new();
    let result = pipeline.generate_with_progress("a cat", None, &config(10, 64, 64, 3), |e| {
        events.push(e.clone())
    });

    assert!(result.is_err());
    let last = events.last().unwrap();
    assert_eq!(last.status, GenerationStatus::Failed);
    assert_eq!(last.step, 2);
    assert!(last.error.as_deref().unwrap().contains("device lost"));
}

#[test]
fn test_preview_backend_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(root.join("text_encoder.safetensors"), b"").unwrap();
    std::fs::write(root.join("unet.safetensors"), b"").unwrap();
    std::fs::write(root.join("decoder.safetensors"), b"").unwrap();
    std::fs::write(root.join(engines::VOCAB_RESOURCE), r#"{"a": 320, "cat": 2368}"#).unwrap();
    std::fs::write(root.join("model.json"), r#"{"name": "tiny", "hidden_size": 16}"#).unwrap();

    let resources = ModelResources::locate(root, None).unwrap();
    let mut pipeline = StableDiffusionPipeline::load(&resources).unwrap();
    assert_eq!(pipeline.tokenizer().vocab_size(), 2);

    let config = GenerationConfig {
        batch_size: 2,
        ..config(3, 64, 48, 9)
    };
    let images = pipeline.generate("a cat", Some("a"), &config).unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!((images[1].width, images[1].height), (64, 48));
    assert_eq!(images[1].pixels.len(), 64 * 48 * 3);
    assert!(!images[0].to_png().unwrap().is_empty());
}

#[test]
fn test_load_with_bad_vocab_is_setup_failure() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    for name in ["text_encoder", "unet", "decoder"] {
        std::fs::write(root.join(name), b"").unwrap();
    }
    std::fs::write(root.join(engines::VOCAB_RESOURCE), "not json").unwrap();

    let resources = ModelResources::locate(root, None).unwrap();
    let err = StableDiffusionPipeline::load(&resources).err().unwrap();
    assert_eq!(err.phase(), diffusion_api::FailurePhase::Setup);
}
