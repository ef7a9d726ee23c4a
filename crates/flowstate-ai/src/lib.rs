pub mod ai_provider;
pub mod ai_service;
pub mod config;
pub mod providers;

pub use ai_provider::{create_provider, AiProviderTrait, GenerationOptions};
pub use ai_service::{AiService, ContentVerdict};
pub use config::{AiConfig, AiProvider};
