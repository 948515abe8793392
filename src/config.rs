//! API endpoint configuration.
//!
//! Two values cover the whole external surface: where the GraphQL endpoint
//! lives and the bearer token it expects.

use crate::error::{Error, Result};

pub const DEFAULT_API_URL: &str = "https://app.birdweather.com/graphql";

pub const ENV_API_URL: &str = "BIRDWEATHER_API_URL";
pub const ENV_API_KEY: &str = "BIRDWEATHER_API_KEY";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        ApiConfig {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Read the endpoint from the environment.
    ///
    /// `BIRDWEATHER_API_KEY` is required; `BIRDWEATHER_API_URL` falls back
    /// to the public endpoint.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var(ENV_API_URL).unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_key = std::env::var(ENV_API_KEY)
            .map_err(|_| Error::Config(format!("{ENV_API_KEY} is not set")))?;
        if api_key.trim().is_empty() {
            return Err(Error::Config(format!("{ENV_API_KEY} is empty")));
        }
        Ok(ApiConfig { base_url, api_key })
    }
}
