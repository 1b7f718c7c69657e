//! Download and inflate a source's compressed map dump, at most once per day.

use flate2::read::MultiGzDecoder;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed to decompress snapshot: {0}")]
    Decompress(#[source] io::Error),
    #[error("snapshot is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("could not {op} {}: {source}", .path.display())]
    Io { op: &'static str, path: PathBuf, #[source] source: io::Error },
    #[error("decode task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl FetchError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

fn io_err<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> FetchError + 'a {
    move |source| FetchError::Io { op, path: path.to_path_buf(), source }
}

/// Something that can GET a URL and hand back the body verbatim.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout_ms: u64,
    pub user_agent: String,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            timeout_ms: 30_000,
            user_agent: format!("worldmap/{}", env!("CARGO_PKG_VERSION")),
            retries: 2,
            retry_delay_ms: 500,
        }
    }
}

/// Plain unauthenticated HTTP(S). No content decoding is negotiated, so the
/// body is the artifact exactly as served.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(opts: &FetchOptions) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(opts.timeout_ms))
            .connect_timeout(Duration::from_millis(opts.timeout_ms.min(10_000)))
            .user_agent(opts.user_agent.clone())
            .build()?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send {
        let request = self.client.get(url);
        let url = url.to_string();
        async move {
            let resp = request.send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::Status { url, status: status.as_u16() });
            }
            Ok(resp.bytes().await?.to_vec())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Both artifacts were already on disk; nothing was done.
    Cached,
    /// The compressed artifact was on disk and was inflated again locally.
    Inflated { text_bytes: usize },
    Downloaded { bytes: usize, sha256: String },
}

/// Make sure `text` holds the inflated dump behind `url`.
///
/// An existing `compressed` artifact means the day's download already
/// happened, so the network is never touched in that case. A payload that
/// cannot be inflated is not kept, so a later run can try again. Both
/// artifacts are staged next to their final path and renamed into place, so
/// an interrupted run never leaves a truncated file that looks cached.
pub async fn ensure_snapshot<T: Transport>(
    transport: &T,
    url: &str,
    compressed: &Path,
    text: &Path,
    opts: &FetchOptions,
) -> Result<FetchOutcome, FetchError> {
    if fs::try_exists(compressed).await.map_err(io_err("inspect", compressed))? {
        if fs::try_exists(text).await.map_err(io_err("inspect", text))? {
            debug!(path = %compressed.display(), "snapshot already fetched");
            return Ok(FetchOutcome::Cached);
        }
        let bytes = fs::read(compressed).await.map_err(io_err("read", compressed))?;
        let inflated = tokio::task::spawn_blocking(move || inflate(&bytes)).await?;
        let text_bytes = store_text(inflated, compressed, text).await?;
        info!(path = %text.display(), text_bytes, "inflated cached snapshot");
        return Ok(FetchOutcome::Inflated { text_bytes });
    }

    let bytes = download(transport, url, opts).await?;
    let len = bytes.len();
    write_staged(compressed, &bytes).await?;
    let (sha256, inflated) =
        tokio::task::spawn_blocking(move || (hex::encode(Sha256::digest(&bytes)), inflate(&bytes))).await?;
    let text_bytes = store_text(inflated, compressed, text).await?;
    info!(url, bytes = len, text_bytes, %sha256, "downloaded snapshot");
    Ok(FetchOutcome::Downloaded { bytes: len, sha256 })
}

async fn store_text(inflated: Result<String, FetchError>, compressed: &Path, text: &Path) -> Result<usize, FetchError> {
    let body = match inflated {
        Ok(body) => body,
        Err(e) => {
            if let Err(rm) = fs::remove_file(compressed).await {
                warn!(path = %compressed.display(), error = %rm, "could not discard bad snapshot");
            }
            return Err(e);
        }
    };
    write_staged(text, body.as_bytes()).await?;
    Ok(body.len())
}

/// Sibling path an artifact is written to before being renamed over `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn write_staged(path: &Path, data: &[u8]) -> Result<(), FetchError> {
    let tmp = staging_path(path);
    fs::write(&tmp, data).await.map_err(io_err("write", &tmp))?;
    fs::rename(&tmp, path).await.map_err(io_err("rename", &tmp))
}

/// GET with exponential backoff on transient failures.
pub async fn download<T: Transport>(transport: &T, url: &str, opts: &FetchOptions) -> Result<Vec<u8>, FetchError> {
    let mut attempt = 0u32;
    loop {
        match transport.get(url).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_retryable() && attempt < opts.retries => {
                let delay = opts.retry_delay_ms.saturating_mul(1u64 << attempt.min(16));
                warn!(url, attempt = attempt + 1, error = %e, delay_ms = delay, "fetch failed, retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Gunzip a dump and check it is UTF-8 text.
pub fn inflate(bytes: &[u8]) -> Result<String, FetchError> {
    let mut out = Vec::new();
    MultiGzDecoder::new(bytes).read_to_end(&mut out).map_err(FetchError::Decompress)?;
    Ok(String::from_utf8(out)?)
}
