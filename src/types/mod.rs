//! OpenAI-compatible request/response types

mod error;
mod image;

pub use error::*;
pub use image::*;
