//! Dedicated inference thread owning the sampling pipeline

mod request;
mod thread;

pub use request::{InferenceRequest, ModelStatus};
pub use thread::inference_thread;
