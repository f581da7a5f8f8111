use secrecy::{ExposeSecret, SecretString};

use crate::types::InitConfig;

use super::consts;

/// Connection settings for a bot backend.
///
/// `new()` seeds itself from the environment (`BOTWIRE_URL`,
/// `BOTWIRE_BOT_KEY`, `BOTWIRE_DEVICE_ID`, `BOTWIRE_AUTH_TOKEN`), so demos
/// can run straight from a `.env` file. Use [`ConfigBuilder`] to override
/// any of it in code.
#[derive(Debug)]
pub struct Config {
    url: String,
    bot_key: String,
    device_id: String,
    auth_token: SecretString,
    init: InitConfig,
}

impl Config {
    pub fn new() -> Self {
        let url = std::env::var(consts::BOTWIRE_URL).unwrap_or_else(|_| consts::DEFAULT_URL.to_string());
        let bot_key = std::env::var(consts::BOTWIRE_BOT_KEY).unwrap_or_default();
        let device_id = std::env::var(consts::BOTWIRE_DEVICE_ID).unwrap_or_default();
        let auth_token = std::env::var(consts::BOTWIRE_AUTH_TOKEN).unwrap_or_default();
        Self {
            url,
            bot_key,
            device_id,
            auth_token: SecretString::from(auth_token),
            init: InitConfig::builder().build(),
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder { config: Config::new() }
    }

    pub fn to_builder(&self) -> ConfigBuilder {
        ConfigBuilder { config: self.clone() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn bot_key(&self) -> &str {
        &self.bot_key
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn auth_token(&self) -> &SecretString {
        &self.auth_token
    }

    pub fn init_config(&self) -> &InitConfig {
        &self.init
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            bot_key: self.bot_key.clone(),
            device_id: self.device_id.clone(),
            auth_token: SecretString::from(self.auth_token.expose_secret().to_string()),
            init: self.init.clone(),
        }
    }
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    pub fn with_bot_key(mut self, bot_key: impl Into<String>) -> Self {
        self.config.bot_key = bot_key.into();
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.config.device_id = device_id.into();
        self
    }

    pub fn with_auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.config.auth_token = SecretString::from(auth_token.into());
        self
    }

    pub fn with_init_config(mut self, init: InitConfig) -> Self {
        self.config.init = init;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
