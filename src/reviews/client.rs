use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::api_types::parse_reviews;
use super::types::Review;
use crate::config::{Config, RemoteConfig};
use crate::error::FetchError;
use crate::remote::RemoteFetcher;

/// Reviews endpoint reached over HTTP(S)
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  endpoint: Url,
  token: Option<String>,
  label: String,
}

impl HttpFetcher {
  pub fn new(endpoint: Url, timeout: Duration, token: Option<String>) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("tajsync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let label = endpoint.host_str().unwrap_or("remote").to_string();

    Ok(Self {
      client,
      endpoint,
      token,
      label,
    })
  }
}

#[async_trait]
impl RemoteFetcher<Review> for HttpFetcher {
  fn label(&self) -> &str {
    &self.label
  }

  async fn fetch_all(&self) -> Result<Vec<Review>, FetchError> {
    let mut request = self
      .client
      .get(self.endpoint.clone())
      .header(ACCEPT, "application/json");
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(classify_transport)?;
    let status = response.status();
    if !status.is_success() {
      return Err(classify_status(status));
    }

    let body = response.bytes().await.map_err(classify_transport)?;
    let reviews = parse_reviews(&body)?;
    tracing::debug!(count = reviews.len(), endpoint = %self.endpoint, "fetched reviews");
    Ok(reviews)
  }
}

/// Map a non-success HTTP status to a failure class.
fn classify_status(status: StatusCode) -> FetchError {
  match status {
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
      FetchError::Permanent(format!("authorization rejected ({})", status))
    }
    StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
      FetchError::Transient(format!("server asked to retry ({})", status))
    }
    s if s.is_server_error() => FetchError::Transient(format!("server error ({})", s)),
    s => FetchError::Permanent(format!("unexpected response ({})", s)),
  }
}

fn classify_transport(e: reqwest::Error) -> FetchError {
  if e.is_builder() || e.is_decode() {
    FetchError::Permanent(e.to_string())
  } else {
    FetchError::Transient(e.to_string())
  }
}

/// Reviews document on the local filesystem (`file://` endpoints)
#[derive(Clone)]
pub struct FileFetcher {
  path: PathBuf,
  label: String,
}

impl FileFetcher {
  pub fn new(path: PathBuf) -> Self {
    let label = path.display().to_string();
    Self { path, label }
  }
}

#[async_trait]
impl RemoteFetcher<Review> for FileFetcher {
  fn label(&self) -> &str {
    &self.label
  }

  async fn fetch_all(&self) -> Result<Vec<Review>, FetchError> {
    let body = tokio::fs::read(&self.path).await.map_err(|e| {
      FetchError::Transient(format!("Failed to read {}: {}", self.path.display(), e))
    })?;
    parse_reviews(&body)
  }
}

/// Build the fetcher matching the configured endpoint scheme.
pub fn fetcher_for(remote: &RemoteConfig) -> Result<Arc<dyn RemoteFetcher<Review>>> {
  let endpoint =
    Url::parse(&remote.url).map_err(|e| eyre!("Invalid remote url {}: {}", remote.url, e))?;

  match endpoint.scheme() {
    "http" | "https" => {
      let timeout = Duration::from_secs(remote.timeout_secs);
      let fetcher = HttpFetcher::new(endpoint, timeout, Config::get_api_token())?;
      Ok(Arc::new(fetcher))
    }
    "file" => {
      let path = endpoint
        .to_file_path()
        .map_err(|_| eyre!("Invalid file url: {}", remote.url))?;
      Ok(Arc::new(FileFetcher::new(path)))
    }
    other => Err(eyre!("Unsupported remote scheme: {}", other)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_classification() {
    assert!(matches!(
      classify_status(StatusCode::SERVICE_UNAVAILABLE),
      FetchError::Transient(_)
    ));
    assert!(matches!(
      classify_status(StatusCode::TOO_MANY_REQUESTS),
      FetchError::Transient(_)
    ));
    assert!(matches!(
      classify_status(StatusCode::UNAUTHORIZED),
      FetchError::Permanent(_)
    ));
    assert!(matches!(
      classify_status(StatusCode::NOT_FOUND),
      FetchError::Permanent(_)
    ));
  }

  #[tokio::test]
  async fn test_file_fetcher_reads_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reviews.json");
    std::fs::write(
      &path,
      r#"[{"id": "r1", "author": "Komala Alanazi", "content": "Un choix sûr!", "rating": 5}]"#,
    )
    .unwrap();

    let fetcher = FileFetcher::new(path);
    let reviews = fetcher.fetch_all().await.unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].author, "Komala Alanazi");
  }

  #[tokio::test]
  async fn test_file_fetcher_missing_file_is_transient() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FileFetcher::new(dir.path().join("missing.json"));
    assert!(matches!(
      fetcher.fetch_all().await,
      Err(FetchError::Transient(_))
    ));
  }

  #[test]
  fn test_fetcher_for_rejects_unknown_scheme() {
    let remote = RemoteConfig {
      url: "ftp://example.com/reviews".to_string(),
      timeout_secs: 5,
    };
    assert!(fetcher_for(&remote).is_err());
  }
}
