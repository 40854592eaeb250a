use attune_socket::websocket_scheme;
use thiserror::Error;

pub const API_URL_ENV: &str = "ATTUNE_API_URL";
pub const WS_URL_ENV: &str = "ATTUNE_WS_URL";
pub const APP_NAME_ENV: &str = "ATTUNE_APP_NAME";
pub const VERBOSE_TRANSCRIPTION_ENV: &str = "ATTUNE_VERBOSE_TRANSCRIPTION";
pub const DEFAULT_APP_NAME: &str = "Empathic AI Therapy";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: expected 'true' or 'false', found '{value}'")]
    InvalidFlag { name: &'static str, value: String },
}

/// Backend endpoints and presentation flags resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub api_base_url: String,
    pub ws_base_url: String,
    pub app_name: String,
    pub verbose_transcription: bool,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, RuntimeConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves the config through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RuntimeConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_base_url = read(API_URL_ENV)
            .map(|value| value.trim_end_matches('/').to_string())
            .ok_or(RuntimeConfigError::Missing(API_URL_ENV))?;
        let ws_base_url = match read(WS_URL_ENV) {
            Some(value) => value.trim_end_matches('/').to_string(),
            None => derive_ws_base_url(&api_base_url),
        };
        let app_name = read(APP_NAME_ENV).unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
        let verbose_transcription = match read(VERBOSE_TRANSCRIPTION_ENV) {
            Some(value) => parse_flag(VERBOSE_TRANSCRIPTION_ENV, &value)?,
            None => false,
        };

        Ok(Self {
            api_base_url,
            ws_base_url,
            app_name,
            verbose_transcription,
        })
    }
}

/// `http(s)://host/` becomes `ws(s)://host`.
pub fn derive_ws_base_url(api_base_url: &str) -> String {
    websocket_scheme(api_base_url.trim().trim_end_matches('/'))
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, RuntimeConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(RuntimeConfigError::InvalidFlag {
            name,
            value: value.to_string(),
        }),
    }
}
