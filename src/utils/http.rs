use std::time::Duration;

use reqwest::Client;

use crate::error::StudioError;

pub fn build_http_client(timeout_seconds: u64) -> Result<Client, StudioError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|err| StudioError::Configuration(format!("Failed to build HTTP client: {err}")))
}
