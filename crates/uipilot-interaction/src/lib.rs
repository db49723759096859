//! Inference service clients.

pub mod openrouter_vision_client;
pub mod prompt;

pub use openrouter_vision_client::OpenRouterVisionClient;
