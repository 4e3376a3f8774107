use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use log::debug;
use reqwest::{header, Client, StatusCode};
use thiserror::Error;
use url::Url;

use crate::task::RemoteFile;
use crate::util::filename_from_url;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote returned status {0}")]
    Status(StatusCode),
    #[error("invalid location {0:?}")]
    InvalidLocation(String),
    #[error("remote ended early at byte {offset}")]
    UnexpectedEof { offset: u64 },
}

/// Random-access reader over remote objects.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Returns up to `limit` bytes starting at `offset`. A short read is valid;
    /// an empty one means the object ended.
    async fn fetch_chunk(
        &self,
        location: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<u8>, SourceError>;

    /// Reads the whole object front to back. Used when the remote cannot
    /// serve ranges or the size is unknown.
    ///
    /// The default walks `fetch_chunk` in `chunk_size` steps until it
    /// returns nothing.
    fn stream_from_start<'a>(
        &'a self,
        location: &'a str,
        chunk_size: usize,
    ) -> BoxStream<'a, Result<Vec<u8>, SourceError>> {
        stream::unfold(Some(0u64), move |offset| async move {
            let offset = offset?;
            match self.fetch_chunk(location, offset, chunk_size).await {
                Ok(data) if data.is_empty() => None,
                Ok(data) => {
                    let next = offset + data.len() as u64;
                    Some((Ok(data), Some(next)))
                }
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }
}

/// HTTP(S) source issuing `Range` requests.
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(timeout: Option<Duration>) -> Result<Self, SourceError> {
        let mut builder = Client::builder()
            .user_agent(concat!("relaysave/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .tcp_nodelay(true);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Resolves size, display name and range support of `location` with a
    /// HEAD request, falling back to a one-byte range request when HEAD is
    /// refused or omits the length.
    pub async fn describe(&self, location: &str) -> Result<RemoteFile, SourceError> {
        let url = parse_location(location)?;
        let response = self.client.head(url.clone()).send().await?;

        let head = if response.status().is_success() {
            let length = parse_content_length(response.headers().get(header::CONTENT_LENGTH));
            let supports_ranges = accepts_byte_ranges(response.headers());
            let name = filename_from_headers(response.headers());
            match length {
                Some(size) => RemoteHead {
                    size,
                    name,
                    supports_ranges,
                },
                None if supports_ranges => {
                    let mut head = self.ranged_head(&url).await?;
                    head.name = name.or(head.name);
                    head
                }
                None => RemoteHead {
                    size: 0,
                    name,
                    supports_ranges,
                },
            }
        } else if matches!(
            response.status(),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
        ) {
            self.ranged_head(&url).await?
        } else {
            return Err(SourceError::Status(response.status()));
        };

        let name = head.name.unwrap_or_else(|| filename_from_url(&url));
        if !head.supports_ranges {
            debug!("{location} does not accept ranges; it will be streamed");
        }
        debug!("head {location}: {} bytes as {name:?}", head.size);
        Ok(RemoteFile {
            location: location.to_string(),
            size: head.size,
            name,
            supports_ranges: head.supports_ranges,
        })
    }

    async fn ranged_head(&self, url: &Url) -> Result<RemoteHead, SourceError> {
        let response = self
            .client
            .get(url.clone())
            .header(header::RANGE, "bytes=0-0")
            .send()
            .await?;

        let status = response.status();
        let name = filename_from_headers(response.headers());
        if status == StatusCode::PARTIAL_CONTENT {
            let size = parse_content_range(response.headers().get(header::CONTENT_RANGE))
                .unwrap_or(0);
            Ok(RemoteHead {
                size,
                name,
                supports_ranges: true,
            })
        } else if status.is_success() {
            Ok(RemoteHead {
                size: response.content_length().unwrap_or(0),
                name,
                supports_ranges: false,
            })
        } else {
            Err(SourceError::Status(status))
        }
    }
}

struct RemoteHead {
    size: u64,
    name: Option<String>,
    supports_ranges: bool,
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch_chunk(
        &self,
        location: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<u8>, SourceError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let url = parse_location(location)?;
        let end = offset + limit as u64 - 1;
        let response = self
            .client
            .get(url)
            .header(header::RANGE, format!("bytes={offset}-{end}"))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Vec::new());
        }
        // A plain 200 ignores the range, only usable from the start.
        if !(status == StatusCode::PARTIAL_CONTENT || (offset == 0 && status.is_success())) {
            return Err(SourceError::Status(status));
        }

        let mut data = Vec::with_capacity(limit);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let room = limit - data.len();
            data.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if data.len() >= limit {
                break;
            }
        }
        Ok(data)
    }

    fn stream_from_start<'a>(
        &'a self,
        location: &'a str,
        _chunk_size: usize,
    ) -> BoxStream<'a, Result<Vec<u8>, SourceError>> {
        let request = async move {
            let url = parse_location(location)?;
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Status(status));
            }
            Ok(response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(SourceError::from)))
        };
        stream::once(request).try_flatten().boxed()
    }
}

fn accepts_byte_ranges(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::ACCEPT_RANGES)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("bytes"))
        .unwrap_or(false)
}

fn parse_location(location: &str) -> Result<Url, SourceError> {
    let url =
        Url::parse(location).map_err(|_| SourceError::InvalidLocation(location.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(SourceError::InvalidLocation(location.to_string()));
    }
    Ok(url)
}

fn parse_content_length(value: Option<&header::HeaderValue>) -> Option<u64> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

fn parse_content_range(value: Option<&header::HeaderValue>) -> Option<u64> {
    let raw = value?.to_str().ok()?;
    let (_, total) = raw.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn filename_from_headers(headers: &header::HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_disposition)
}

fn parse_content_disposition(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("filename=") {
            let trimmed = rest.trim_matches('"');
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn content_range_total_is_extracted() {
        let value = HeaderValue::from_static("bytes 0-0/12345");
        assert_eq!(parse_content_range(Some(&value)), Some(12345));
        let unknown = HeaderValue::from_static("bytes 0-0/*");
        assert_eq!(parse_content_range(Some(&unknown)), None);
    }

    #[test]
    fn content_length_parses_digits() {
        let value = HeaderValue::from_static("2048");
        assert_eq!(parse_content_length(Some(&value)), Some(2048));
        assert_eq!(parse_content_length(None), None);
    }

    #[test]
    fn accept_ranges_header_is_detected() {
        let mut headers = header::HeaderMap::new();
        assert!(!accepts_byte_ranges(&headers));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("none"));
        assert!(!accepts_byte_ranges(&headers));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("Bytes"));
        assert!(accepts_byte_ranges(&headers));
    }

    #[test]
    fn disposition_filename_is_unquoted() {
        assert_eq!(
            parse_content_disposition("attachment; filename=\"report.pdf\""),
            Some("report.pdf".to_string())
        );
        assert_eq!(parse_content_disposition("inline"), None);
    }

    #[test]
    fn only_http_locations_are_accepted() {
        assert!(parse_location("https://example.com/file").is_ok());
        assert!(matches!(
            parse_location("ftp://example.com/file"),
            Err(SourceError::InvalidLocation(_))
        ));
        assert!(matches!(
            parse_location("not a url"),
            Err(SourceError::InvalidLocation(_))
        ));
    }

    #[tokio::test]
    async fn zero_limit_fetches_nothing() {
        let source = HttpSource::new(None).unwrap();
        let data = source
            .fetch_chunk("https://example.invalid/file", 0, 0)
            .await
            .unwrap();
        assert!(data.is_empty());
    }
}
