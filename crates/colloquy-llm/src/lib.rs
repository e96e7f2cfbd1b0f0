pub mod converter;
pub mod gemini;
pub mod sse;

pub mod mock;

pub use gemini::GeminiEngine;
pub use mock::{MockEngine, MockResponse};
