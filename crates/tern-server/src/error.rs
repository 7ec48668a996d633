use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: set the {env_var} environment variable")]
    MissingEnvVar { env_var: String },

    #[error(transparent)]
    Other(#[from] config::ConfigError),
}

/// Map a settings field path like `provider.api_key` to the environment
/// variable that supplies it.
pub fn to_env_var(field: &str) -> String {
    format!("TERN_{}", field.replace('.', "__").to_ascii_uppercase())
}
