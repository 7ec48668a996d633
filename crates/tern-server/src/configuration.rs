use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use serde::Deserialize;
use std::net::SocketAddr;
use tern::providers::configs::OpenAiProviderConfig;

#[derive(Debug, Default, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Failed to parse socket address")
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_host")]
    pub host: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

impl ProviderSettings {
    pub fn into_config(self) -> OpenAiProviderConfig {
        OpenAiProviderConfig {
            host: self.host,
            api_key: self.api_key,
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Provider defaults
            .set_default("provider.host", default_provider_host())?
            .set_default("provider.model", default_model())?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("TERN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        // Handle missing field errors specially so startup failures name
        // the environment variable to set
        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    // the only field without a default lives in the provider section
                    let env_var = match field {
                        "provider" | "api_key" => to_env_var("provider.api_key"),
                        other => to_env_var(other),
                    };
                    Err(ConfigError::MissingEnvVar { env_var })
                } else if let config::ConfigError::NotFound(field) = &err {
                    let env_var = to_env_var(field);
                    Err(ConfigError::MissingEnvVar { env_var })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_provider_host() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with("TERN_") {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_settings_from_env() {
        clear_env();
        std::env::set_var("TERN_PROVIDER__API_KEY", "test-key");
        std::env::set_var("TERN_PROVIDER__MODEL", "gpt-4o-mini");
        std::env::set_var("TERN_SERVER__PORT", "4000");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.provider.api_key, "test-key");
        assert_eq!(settings.provider.model, "gpt-4o-mini");
        assert_eq!(settings.provider.host, "https://api.openai.com");
        assert_eq!(settings.server.port, 4000);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_api_key_is_fatal() {
        clear_env();

        let err = Settings::new().unwrap_err();
        match err {
            ConfigError::MissingEnvVar { env_var } => {
                assert_eq!(env_var, "TERN_PROVIDER__API_KEY");
            }
            other => panic!("expected MissingEnvVar, got {other:?}"),
        }
    }
}
