use std::{
    fmt,
    io::{self, Read, Write},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use reqwest::blocking::Client;
use thiserror::Error;
use url::Url;

const CHUNK_SIZE: usize = 32 * 1024;
const PIXELDRAIN_HOST: &str = "pixeldrain.com";

/// Where a model package comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    Url(String),
    Local(PathBuf),
}

impl PackageSource {
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, PackageSource::Url(_))
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageSource::Url(url) => f.write_str(url),
            PackageSource::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Shared flag used to abandon an in-flight ingestion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported url scheme `{0}`")]
    UnsupportedScheme(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("server answered with status {0}")]
    Status(u16),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("download cancelled")]
    Cancelled,
}

/// Byte source for remote packages. Implementations stream the body of `url`
/// into `dest` and return the number of bytes written.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &Url, dest: &mut dyn Write, cancel: &CancelToken)
        -> Result<u64, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = Client::builder();
        // reqwest's blocking client defaults to a 30s timeout; unset means none.
        builder = builder.timeout(timeout);
        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &Url,
        dest: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<u64, FetchError> {
        let mut response = self.client.get(url.clone()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let mut downloaded = 0u64;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let read = response.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            dest.write_all(&buffer[..read])?;
            downloaded += read as u64;
        }
        dest.flush()?;
        tracing::debug!(%url, downloaded, "download finished");
        Ok(downloaded)
    }
}

/// Parses a user supplied link and rewrites pixeldrain share pages
/// (`/u/<id>`) to the raw file endpoint (`/api/file/<id>`).
pub fn resolve_download_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|source| FetchError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::UnsupportedScheme(url.scheme().to_string()));
    }

    if !is_pixeldrain(&url) || url.path().starts_with("/api/file/") {
        return Ok(url);
    }

    let Some(file_id) = last_segment(&url) else {
        return Ok(url);
    };
    let rewritten = format!("https://{PIXELDRAIN_HOST}/api/file/{file_id}");
    tracing::debug!(link = %url, %rewritten, "rewrote pixeldrain link");
    Url::parse(&rewritten).map_err(|source| FetchError::InvalidUrl {
        url: rewritten,
        source,
    })
}

pub(crate) fn filename_from_url(url: &Url) -> Option<String> {
    last_segment(url).map(str::to_string)
}

fn is_pixeldrain(url: &Url) -> bool {
    url.host_str()
        .map(|host| host == PIXELDRAIN_HOST || host.ends_with(".pixeldrain.com"))
        .unwrap_or(false)
}

fn last_segment(url: &Url) -> Option<&str> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::models::fixtures::{finish_chunked, respond, serve_once, start_chunked, write_chunk};

    #[test]
    fn pixeldrain_share_link_is_rewritten() {
        let url = resolve_download_url("https://pixeldrain.com/u/3tJmABXA").unwrap();
        assert_eq!(url.as_str(), "https://pixeldrain.com/api/file/3tJmABXA");
    }

    #[test]
    fn pixeldrain_api_link_is_untouched() {
        let url = resolve_download_url("https://pixeldrain.com/api/file/3tJmABXA").unwrap();
        assert_eq!(url.as_str(), "https://pixeldrain.com/api/file/3tJmABXA");
    }

    #[test]
    fn other_hosts_pass_through() {
        let raw = "https://huggingface.co/phant0m4r/LiSA/resolve/main/LiSA.zip";
        assert_eq!(resolve_download_url(raw).unwrap().as_str(), raw);
    }

    #[test]
    fn lookalike_hosts_are_not_rewritten() {
        let raw = "https://notpixeldrain.com/u/abc";
        assert_eq!(resolve_download_url(raw).unwrap().as_str(), raw);
    }

    #[test]
    fn rejects_garbage_and_non_http() {
        assert!(matches!(
            resolve_download_url("not a url"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(matches!(
            resolve_download_url("ftp://example.com/model.zip"),
            Err(FetchError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn filename_ignores_query() {
        let url = Url::parse("https://example.com/models/AZKi.zip?download=true").unwrap();
        assert_eq!(filename_from_url(&url).as_deref(), Some("AZKi.zip"));
    }

    fn http_fetch(fetcher: &HttpFetcher, url: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError> {
        let mut body = Vec::new();
        fetcher.fetch(&Url::parse(url).unwrap(), &mut body, cancel)?;
        Ok(body)
    }

    #[test]
    fn http_fetch_streams_the_body() {
        let url = serve_once("/Lisa.zip", |stream| respond(stream, "200 OK", b"zip bytes"));
        let fetcher = HttpFetcher::new(None).unwrap();

        let body = http_fetch(&fetcher, &url, &CancelToken::new()).unwrap();

        assert_eq!(body, b"zip bytes");
    }

    #[test]
    fn http_error_status_is_reported() {
        let url = serve_once("/Lisa.zip", |stream| respond(stream, "404 Not Found", b"gone"));
        let fetcher = HttpFetcher::new(None).unwrap();

        let error = http_fetch(&fetcher, &url, &CancelToken::new()).unwrap_err();

        assert!(matches!(error, FetchError::Status(404)), "{error:?}");
    }

    #[test]
    fn http_fetch_stops_when_cancelled_between_chunks() {
        let cancel = CancelToken::new();
        let server_cancel = cancel.clone();
        let url = serve_once("/Lisa.zip", move |stream| {
            start_chunked(stream);
            write_chunk(stream, &[1u8; 1024]);
            server_cancel.cancel();
            write_chunk(stream, &[2u8; 1024]);
            thread::sleep(Duration::from_millis(200));
            write_chunk(stream, &[3u8; 1024]);
            finish_chunked(stream);
        });
        let fetcher = HttpFetcher::new(None).unwrap();

        let error = http_fetch(&fetcher, &url, &cancel).unwrap_err();

        assert!(matches!(error, FetchError::Cancelled), "{error:?}");
    }

    #[test]
    fn configured_timeout_aborts_a_stalled_download() {
        let url = serve_once("/Lisa.zip", |stream| {
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n0123456789");
            thread::sleep(Duration::from_secs(3));
        });
        let fetcher = HttpFetcher::new(Some(Duration::from_millis(300))).unwrap();
        let started = std::time::Instant::now();

        assert!(http_fetch(&fetcher, &url, &CancelToken::new()).is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
