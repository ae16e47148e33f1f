use std::path::Path;

use reqwest::{Client, Response, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;

use crate::config::Settings;
use crate::retry::RetryPolicy;
use crate::types::{SchleuderError, SourceError};

/// Thin wrapper around [`reqwest::Client`] that retries transient failures.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
}

enum Failure {
    Transient(String),
    Fatal(String),
}

impl HttpClient {
    pub fn new(settings: &Settings) -> Result<Self, SchleuderError> {
        let client = Client::builder()
            .timeout(settings.http_timeout())
            .user_agent(settings.user_agent())
            .build()?;
        Ok(Self {
            client,
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                base: settings.retry_backoff(),
            },
        })
    }

    /// GET `url` and return the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        let response = self.send(url).await?;
        response
            .text()
            .await
            .map_err(|err| SourceError::unavailable(format!("reading `{url}` failed: {err}")))
    }

    /// Stream the body of `url` into `dest`, truncating it first. Returns the byte count.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, SourceError> {
        let mut response = self.send(url).await?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| SourceError::unavailable(format!("download of `{url}` broke off: {err}")))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        tracing::debug!(url, bytes = written, "download finished");
        Ok(written)
    }

    async fn send(&self, url: &str) -> Result<Response, SourceError> {
        let attempts = self.retry.attempts();
        let mut last = String::new();

        for attempt in 0..attempts {
            match self.send_once(url).await {
                Ok(response) => return Ok(response),
                Err(Failure::Fatal(msg)) => return Err(SourceError::Unavailable(msg)),
                Err(Failure::Transient(msg)) => {
                    last = msg;
                    if attempt + 1 >= attempts {
                        break;
                    }
                    let backoff = self.retry.delay(attempt);
                    tracing::debug!(url, attempt, ?backoff, error = %last, "transient failure, retrying");
                    sleep(backoff).await;
                }
            }
        }

        Err(SourceError::Unavailable(format!(
            "{last} (gave up after {attempts} attempts)"
        )))
    }

    async fn send_once(&self, url: &str) -> Result<Response, Failure> {
        let response = self.client.get(url).send().await.map_err(|err| {
            let msg = format!("request to `{url}` failed: {err}");
            if err.is_timeout() || err.is_connect() || err.is_request() {
                Failure::Transient(msg)
            } else {
                Failure::Fatal(msg)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if is_transient_status(status) {
            Err(Failure::Transient(format!("`{url}` answered {status}")))
        } else {
            Err(Failure::Fatal(format!("`{url}` answered {status}")))
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn unreachable_host_gives_up_as_unavailable() {
        let mut settings = Settings::new("/tmp");
        settings.max_retries = 1;
        settings.retry_backoff_ms = 1;
        settings.http_timeout_secs = 2;
        let http = HttpClient::new(&settings).expect("client");

        let err = http.get_text("http://127.0.0.1:9/").await.unwrap_err();
        match err {
            SourceError::Unavailable(msg) => assert!(msg.contains("2 attempts"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
