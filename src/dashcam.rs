use crate::error::{Result, SyncError};
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

/// Index page listing the recordings stored on the dashcam
const INDEX_PATH: &str = "blackvue_vod.cgi";

/// Directory recordings are served from
const RECORD_PATH: &str = "Record/";

/// Header carrying the client affinity token expected by some test doubles
const AFFINITY_HEADER: &str = "X-Affinity-Key";

/// Result of fetching a single file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fetched {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Fetched {
    /// Transfer speed in bits per second, when measurable
    pub fn speed_bps(&self) -> Option<u64> {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            Some((self.bytes as f64 * 8.0 / secs) as u64)
        } else {
            None
        }
    }
}

/// HTTP client for the dashcam's local web interface
#[derive(Debug, Clone)]
pub struct DashcamClient {
    http: Client,
    base_url: Url,
    address: String,
    session_key: Option<String>,
}

impl DashcamClient {
    /// Create a client for a dashcam address such as `192.168.1.99` or `http://host:port`
    pub fn new(address: &str, timeout: Duration, session_key: Option<String>) -> Result<Self> {
        let base_url = base_url(address)?;
        let http = Client::builder()
            // Idle limit per read, not a cap on how long a transfer may take
            .read_timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SyncError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            address: address.to_string(),
            session_key,
        })
    }

    /// Fetch the filenames of the video recordings currently on the dashcam
    pub async fn list_filenames(&self) -> Result<Vec<String>> {
        let url = self.base_url.join(INDEX_PATH)?;
        debug!("Fetching recording index: {}", url);

        let response = self
            .request(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(e, &url))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SyncError::Protocol {
                url: url.to_string(),
                message: format!("status code {}", status.as_u16()),
            });
        }

        // Decodes with the declared charset, UTF-8 when absent
        let body = response.text().await.map_err(|e| self.classify(e, &url))?;
        let filenames = parse_index(&body);
        debug!("Dashcam lists {} recordings", filenames.len());

        Ok(filenames)
    }

    /// Stream a recording file from the dashcam into `target`.
    ///
    /// Error statuses surface as [`SyncError::RemoteFile`]; transport
    /// failures as [`SyncError::Connectivity`]. A partially written target is
    /// left for the caller to clean up.
    pub async fn fetch_file(&self, filename: &str, target: &Path) -> Result<Fetched> {
        let url = self.base_url.join(RECORD_PATH)?.join(filename)?;
        let start = Instant::now();

        let response = self
            .request(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::RemoteFile {
                filename: filename.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        let mut bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.classify(e, &url))?;
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok(Fetched {
            bytes,
            elapsed: start.elapsed(),
        })
    }

    fn request(&self, url: Url) -> RequestBuilder {
        let request = self.http.get(url);
        match &self.session_key {
            Some(key) => request.header(AFFINITY_HEADER, key),
            None => request,
        }
    }

    /// Separate "dashcam unreachable" from "dashcam answered something unexpected"
    fn classify(&self, error: reqwest::Error, url: &Url) -> SyncError {
        if error.is_timeout() {
            SyncError::connectivity(&self.address, format!("timeout: {}", error))
        } else if error.is_connect()
            || error.is_request()
            || error.is_body()
            || error.is_decode()
        {
            // Interrupted bodies surface as decode errors while streaming
            SyncError::connectivity(&self.address, error.to_string())
        } else {
            SyncError::Protocol {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

fn base_url(address: &str) -> Result<Url> {
    let address = address.trim();
    if address.is_empty() {
        return Err(SyncError::config("dashcam address must not be empty"));
    }

    let mut url = if address.contains("://") {
        Url::parse(address)
    } else {
        Url::parse(&format!("http://{}", address))
    }
    .map_err(|e| SyncError::config(format!("invalid dashcam address {}: {}", address, e)))?;

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

/// Extract video filenames from the index body.
///
/// Data lines look like `n:/Record/<filename>,s:<size>`; the version banner
/// and anything else that doesn't match is skipped.
pub fn parse_index(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            let entry = line.strip_prefix("n:/Record/")?;
            let (filename, size) = entry.rsplit_once(",s:")?;
            let valid = !size.is_empty()
                && size.bytes().all(|b| b.is_ascii_digit())
                && filename.len() > ".mp4".len()
                && filename.ends_with(".mp4")
                && !filename.contains('/');
            valid.then(|| filename.to_string())
        })
        .collect()
}
