//! # chorus-providers
//!
//! Generator implementations for Chorus.

pub mod gemini;
pub mod openai;

pub use gemini::GeminiGenerator;
pub use openai::OpenAiGenerator;
