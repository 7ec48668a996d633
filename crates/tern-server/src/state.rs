use tern::providers::configs::OpenAiProviderConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub provider_config: OpenAiProviderConfig,
}
