use async_trait::async_trait;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::ReadAt;
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRIES: u32 = 10;

/// Remote archive read through HTTP Range requests.
///
/// Only the byte ranges the parser asks for are fetched, so listing a large
/// remote archive costs the end records plus the central directory.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
    max_retries: u32,
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Total length from a `Content-Range: bytes 0-0/1234` header.
fn total_from_content_range(value: &str) -> Option<u64> {
    value.rsplit_once('/').and_then(|(_, total)| total.parse().ok())
}

impl HttpRangeReader {
    /// Probe `url` and prepare ranged reads.
    ///
    /// A HEAD request gives the size; servers that omit `Content-Length`
    /// or `Accept-Ranges` there are asked for the first byte instead.
    pub async fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let size = probe(&client, &url).await?;
        log::debug!("remote archive {url}: {size} bytes");

        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Attempts per range before a timeout or connect error is returned.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Payload bytes received so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// One ranged GET into `out`, retried on timeouts and connection
    /// failures. Returns the number of bytes copied.
    async fn fetch(&self, start: u64, end: u64, out: &mut [u8]) -> Result<usize> {
        let range = format!("bytes={start}-{end}");
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(&self.url).header(RANGE, &range).send().await {
                Ok(resp) if resp.status() == StatusCode::PARTIAL_CONTENT => {
                    let body = resp.bytes().await?;
                    let n = body.len().min(out.len());
                    out[..n].copy_from_slice(&body[..n]);
                    return Ok(n);
                }
                Ok(resp) => {
                    return Err(Error::Remote(format!(
                        "range {range} of {} answered {}",
                        self.url,
                        resp.status()
                    )));
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < self.max_retries => {
                    log::warn!("range {range}: {e}, retry {attempt}/{}", self.max_retries);
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    return Err(Error::Remote(format!(
                        "range {range} failed after {attempt} attempts: {e}"
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

async fn probe(client: &Client, url: &str) -> Result<u64> {
    let resp = client.head(url).send().await?;
    if !resp.status().is_success() {
        return Err(Error::Remote(format!("HEAD {url} answered {}", resp.status())));
    }

    let headers = resp.headers();
    let ranged = header_str(headers, ACCEPT_RANGES).is_some_and(|v| v.contains("bytes"));
    let length = header_str(headers, CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok());
    if let (true, Some(length)) = (ranged, length) {
        return Ok(length);
    }

    let resp = client.get(url).header(RANGE, "bytes=0-0").send().await?;
    if resp.status() != StatusCode::PARTIAL_CONTENT {
        return Err(Error::Remote(format!("{url} does not support Range requests")));
    }
    header_str(resp.headers(), CONTENT_RANGE)
        .and_then(total_from_content_range)
        .ok_or_else(|| Error::Remote(format!("{url} did not report its length")))
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let wanted = (end - offset + 1) as usize;
        let mut received = 0;

        // servers may answer a range with fewer bytes than asked
        while received < wanted {
            let n = self
                .fetch(offset + received as u64, end, &mut buf[received..wanted])
                .await?;
            if n == 0 {
                break;
            }
            received += n;
            self.transferred_bytes.fetch_add(n as u64, Ordering::Relaxed);
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
