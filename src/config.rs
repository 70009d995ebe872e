use anyhow::Result;
use std::env;

use crate::services::gemini::DEFAULT_BASE_URL;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_WEB_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub web_addr: String,
}

impl Config {
    /// Read settings from the process environment (after `.env` is loaded).
    /// A missing API key is a startup error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GEMINI_API_KEY")
            .or_else(|| lookup("API_KEY"))
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("GEMINI_API_KEY (or API_KEY) must be set in .env file"))?;

        let model = lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = lookup("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let web_addr = lookup("WEB_ADDR").unwrap_or_else(|| DEFAULT_WEB_ADDR.to_string());

        Ok(Self {
            api_key,
            model,
            base_url,
            web_addr,
        })
    }
}
