//! # Fetching
//!
//! Resolves a location (a path or an `http(s)://` URL) to bytes. Used for both
//! the guest module binary and the dataset. Fetching is async; the guest calls
//! that follow are not.

use std::fmt;

/// Errors while resolving a location.
#[derive(Debug)]
pub enum Error {
    Io { location: String, source: std::io::Error },
    Http { location: String, message: String },
    Status { location: String, status: u16 },
    UnsupportedScheme(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { location, source } => write!(f, "Could not read {}: {}", location, source),
            Self::Http { location, message } => write!(f, "Could not fetch {}: {}", location, message),
            Self::Status { location, status } => write!(f, "Fetching {} returned HTTP {}", location, status),
            Self::UnsupportedScheme(location) => write!(f, "Unsupported location scheme: {}", location),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Turns a location into bytes.
///
/// This trait is designed to be object-safe (`Arc<dyn Fetch>`).
#[async_trait::async_trait]
pub trait Fetch: Send + Sync + 'static {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}

/// Reads local files. Accepts plain paths and `file://` URLs.
#[derive(Clone, Debug, Default)]
pub struct FileFetch;

#[async_trait::async_trait]
impl Fetch for FileFetch {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        let path = location.strip_prefix("file://").unwrap_or(location);
        tokio::fs::read(path).await.map_err(|source| Error::Io {
            location: location.to_string(),
            source,
        })
    }
}

/// Downloads over HTTP(S).
#[derive(Clone, Debug, Default)]
pub struct HttpFetch {
    client: reqwest::Client,
}

impl HttpFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Fetch for HttpFetch {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        let http = |e: reqwest::Error| Error::Http {
            location: location.to_string(),
            message: e.to_string(),
        };
        let response = self.client.get(location).send().await.map_err(http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                location: location.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(http)?;
        tracing::debug!(location, bytes = body.len(), "fetched");
        Ok(body.to_vec())
    }
}

/// Dispatches on the location's scheme: HTTP(S) to [`HttpFetch`], everything
/// else that looks like a path to [`FileFetch`].
#[derive(Clone, Debug, Default)]
pub struct AutoFetch {
    file: FileFetch,
    http: HttpFetch,
}

impl AutoFetch {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Fetch for AutoFetch {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        match location.split_once("://") {
            Some(("http" | "https", _)) => self.http.fetch(location).await,
            Some(("file", _)) | None => self.file.fetch(location).await,
            Some(_) => Err(Error::UnsupportedScheme(location.to_string())),
        }
    }
}
