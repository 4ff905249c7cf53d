mod client;

pub use client::{classify_status, CallFailure, Completion, GeminiClient, KeyPool};
