//! Client configuration.

use serde::Deserialize;

/// Connection settings for the LIMSML web service.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// LIMSML web service url (e.g. `http://localhost:56104/`).
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_url() -> String {
    "http://localhost:56104/".to_string()
}

fn default_username() -> String {
    "SYSTEM".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: default_username(),
            password: String::new(),
        }
    }
}

impl ClientConfig {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}
