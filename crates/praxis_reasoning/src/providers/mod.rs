pub mod mock;
pub mod openai;
mod sse;

use crate::llm::LlmClient;
use anyhow::Result;
use praxis_core::config::LlmConfig;
use std::sync::Arc;

/// Build the client named by `[llm] provider`.
pub fn build_client(cfg: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match cfg.provider.as_str() {
        "openai" | "openai_compat" | "ollama" => {
            tracing::info!("Using OpenAI-compatible provider, model {}", cfg.model);
            Ok(Arc::new(openai::OpenAiCompatClient::from_config(cfg)?))
        }
        "mock" => {
            tracing::info!("Using scripted mock provider");
            Ok(Arc::new(mock::ScriptedProvider::new()))
        }
        other => anyhow::bail!("Unknown LLM provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_rejected() {
        let cfg = LlmConfig {
            provider: "carrier-pigeon".into(),
            ..LlmConfig::default()
        };
        let err = build_client(&cfg).err().unwrap();
        assert!(err.to_string().contains("carrier-pigeon"));
        assert!(build_client(&LlmConfig {
            provider: "mock".into(),
            ..LlmConfig::default()
        })
        .is_ok());
    }
}
