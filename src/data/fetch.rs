//! Download-once cache for the raw split files.

use std::{
    fs,
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use indicatif::{ProgressBar, ProgressStyle};
use tempfile::NamedTempFile;

use super::split::{Split, DEFAULT_BASE_URL};
use crate::config::HellaSwagConfig;

const CHUNK_SIZE: usize = 64 * 1024;

/// An open response body.
pub struct Download {
    /// `None` when the server did not announce a usable length.
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

/// Something that can issue a streaming GET.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<Download, FetchError>;
}

/// Blocking HTTP(S) transport.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    #[must_use]
    pub fn new(connect_timeout: Duration, read_timeout: Option<Duration>) -> Self {
        let mut builder = ureq::AgentBuilder::new().timeout_connect(connect_timeout);
        if let Some(timeout) = read_timeout {
            builder = builder.timeout_read(timeout);
        }
        Self {
            agent: builder.build(),
        }
    }

    #[must_use]
    pub fn from_config(config: &HellaSwagConfig) -> Self {
        Self::new(
            Duration::from_secs(config.connect_timeout_secs),
            config.read_timeout_secs.map(Duration::from_secs),
        )
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Download, FetchError> {
        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(status, _) => FetchError::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(transport) => FetchError::Transport {
                url: url.to_string(),
                message: transport.to_string(),
            },
        })?;

        // A missing or zero length only degrades the progress display.
        let content_length = response
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|&len| len > 0);

        Ok(Download {
            content_length,
            body: Box::new(response.into_reader()),
        })
    }
}

/// Makes sure a split's JSON-lines file exists under the cache directory.
pub struct Fetcher<T: Transport = HttpTransport> {
    cache_dir: PathBuf,
    base_url: String,
    show_progress: bool,
    transport: T,
}

impl Fetcher<HttpTransport> {
    #[must_use]
    pub fn from_config(config: &HellaSwagConfig) -> Self {
        Fetcher::new(config.resolve_cache_dir(), HttpTransport::from_config(config))
            .with_base_url(config.base_url.clone())
            .with_progress(config.show_progress)
    }
}

impl<T: Transport> Fetcher<T> {
    pub fn new(cache_dir: impl Into<PathBuf>, transport: T) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            show_progress: true,
            transport,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Where `split` is cached, whether or not it has been fetched yet.
    #[must_use]
    pub fn local_path(&self, split: Split) -> PathBuf {
        self.cache_dir.join(split.file_name())
    }

    /// Download `split` unless it is already cached, returning the local path.
    ///
    /// The body is streamed into a temporary file next to the destination
    /// and renamed into place only once complete, so a failed download never
    /// leaves a partial file behind.
    pub fn ensure_local(&self, split: Split) -> Result<PathBuf, FetchError> {
        let path = self.local_path(split);
        if path.exists() {
            tracing::debug!("Using cached {split} split at {}", path.display());
            return Ok(path);
        }

        fs::create_dir_all(&self.cache_dir).map_err(|source| FetchError::Io {
            path: self.cache_dir.clone(),
            source,
        })?;

        let url = split.url(&self.base_url);
        tracing::info!("Downloading {url} to {}...", path.display());

        let download = self.transport.get(&url)?;
        let written = self.write_atomically(&url, &path, download)?;

        tracing::info!("Saved {written} bytes to {}", path.display());
        Ok(path)
    }

    fn write_atomically(
        &self,
        url: &str,
        path: &Path,
        download: Download,
    ) -> Result<u64, FetchError> {
        let io_err = |source: std::io::Error| FetchError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&self.cache_dir).map_err(io_err)?;
        let bar = self.progress_bar(path, download.content_length);

        let mut body = download.body;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let n = match body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    bar.abandon();
                    return Err(FetchError::Body {
                        url: url.to_string(),
                        source,
                    });
                }
            };
            tmp.write_all(&buf[..n]).map_err(io_err)?;
            written += n as u64;
            bar.inc(n as u64);
        }

        if let Some(expected) = download.content_length {
            if written < expected {
                bar.abandon();
                return Err(FetchError::Truncated {
                    url: url.to_string(),
                    expected,
                    written,
                });
            }
        }

        tmp.as_file_mut().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        bar.finish();

        Ok(written)
    }

    fn progress_bar(&self, path: &Path, total: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = match total {
            Some(len) => {
                let bar = ProgressBar::new(len);
                bar.set_style(
                    ProgressStyle::with_template(concat!(
                        "{msg} [{elapsed_precise}] {wide_bar} ",
                        "{bytes}/{total_bytes} ({bytes_per_sec})",
                    ))
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} {msg} {bytes} ({bytes_per_sec})",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        };

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        bar.set_message(name);
        bar
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("reading response body from {url} failed: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("download from {url} ended after {written} of {expected} bytes")]
    Truncated {
        url: String,
        expected: u64,
        written: u64,
    },
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_utils::MockTransport;
    use tempfile::TempDir;

    const BODY: &str =
        "{\"ctx\": \"a\", \"endings\": [\"b\", \"c\", \"d\", \"e\"], \"label\": 0}\n";

    fn val_url() -> String {
        Split::Val.url(DEFAULT_BASE_URL)
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn second_call_does_not_touch_the_network() {
        let dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(dir.path(), MockTransport::new().with_body(val_url(), BODY))
            .with_progress(false);

        let first = fetcher.ensure_local(Split::Val).unwrap();
        let second = fetcher.ensure_local(Split::Val).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("hellaswag_val.jsonl"));
        assert_eq!(fetcher.transport().calls(), 1);
        assert_eq!(fetcher.transport().requested(), vec![val_url()]);
        assert_eq!(fs::read_to_string(&first).unwrap(), BODY);
    }

    #[test]
    fn existing_file_is_used_as_is() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hellaswag_train.jsonl");
        fs::write(&path, "cached").unwrap();

        let fetcher = Fetcher::new(dir.path(), MockTransport::new()).with_progress(false);
        assert_eq!(fetcher.ensure_local(Split::Train).unwrap(), path);
        assert_eq!(fetcher.transport().calls(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "cached");
    }

    #[test]
    fn unknown_length_still_downloads() {
        let dir = TempDir::new().unwrap();
        let transport = MockTransport::new().with_body(val_url(), BODY).without_length();
        let fetcher = Fetcher::new(dir.path(), transport);

        let path = fetcher.ensure_local(Split::Val).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), BODY);
    }

    #[test]
    fn creates_missing_cache_dir() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("nested").join("cache");
        let fetcher = Fetcher::new(&cache, MockTransport::new().with_body(val_url(), BODY))
            .with_progress(false);

        fetcher.ensure_local(Split::Val).unwrap();
        assert!(cache.join("hellaswag_val.jsonl").is_file());
    }

    #[test]
    fn base_url_override_is_used() {
        let dir = TempDir::new().unwrap();
        let transport =
            MockTransport::new().with_body("http://mirror.local/hellaswag_test.jsonl", BODY);
        let fetcher = Fetcher::new(dir.path(), transport)
            .with_base_url("http://mirror.local")
            .with_progress(false);

        fetcher.ensure_local(Split::Test).unwrap();
        assert_eq!(
            fetcher.transport().requested(),
            vec!["http://mirror.local/hellaswag_test.jsonl".to_string()]
        );
    }

    #[test]
    fn http_error_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(dir.path(), MockTransport::new()).with_progress(false);

        let err = fetcher.ensure_local(Split::Val).unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert!(dir_entries(dir.path()).is_empty());
    }

    /// Serves a few bytes, then fails or stops short of the announced length.
    struct Flaky {
        announced: Option<u64>,
        fail: bool,
    }

    struct FlakyBody {
        sent: bool,
        fail: bool,
    }

    impl Read for FlakyBody {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.sent {
                self.sent = true;
                let chunk = b"{\"ctx\":";
                buf[..chunk.len()].copy_from_slice(chunk);
                return Ok(chunk.len());
            }
            if self.fail {
                Err(std::io::Error::new(ErrorKind::ConnectionReset, "reset by peer"))
            } else {
                Ok(0)
            }
        }
    }

    impl Transport for Flaky {
        fn get(&self, _url: &str) -> Result<Download, FetchError> {
            Ok(Download {
                content_length: self.announced,
                body: Box::new(FlakyBody {
                    sent: false,
                    fail: self.fail,
                }),
            })
        }
    }

    #[test]
    fn interrupted_body_is_not_committed() {
        let dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(
            dir.path(),
            Flaky {
                announced: None,
                fail: true,
            },
        )
        .with_progress(false);

        let err = fetcher.ensure_local(Split::Val).unwrap_err();
        assert!(matches!(err, FetchError::Body { .. }));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[test]
    fn short_body_is_not_committed() {
        let dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(
            dir.path(),
            Flaky {
                announced: Some(1024),
                fail: false,
            },
        )
        .with_progress(false);

        let err = fetcher.ensure_local(Split::Val).unwrap_err();
        assert!(matches!(
            err,
            FetchError::Truncated {
                expected: 1024,
                written: 7,
                ..
            }
        ));
        assert!(!fetcher.local_path(Split::Val).exists());
        assert!(dir_entries(dir.path()).is_empty());
    }

    /// Answers a single request on a loopback socket with `response`, then
    /// closes the connection. The join handle yields the request line.
    fn serve_once(response: &'static str) -> (String, std::thread::JoinHandle<String>) {
        use std::io::{BufRead, BufReader};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            request_line.trim_end().to_string()
        });

        (base_url, handle)
    }

    fn http() -> HttpTransport {
        HttpTransport::new(Duration::from_secs(5), Some(Duration::from_secs(5)))
    }

    #[test]
    fn http_zero_content_length_is_unknown() {
        let (base_url, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");

        let mut download = http().get(&Split::Val.url(&base_url)).unwrap();
        assert_eq!(download.content_length, None);

        let mut body = Vec::new();
        download.body.read_to_end(&mut body).unwrap();
        assert!(body.is_empty());
        assert_eq!(server.join().unwrap(), "GET /hellaswag_val.jsonl HTTP/1.1");
    }

    #[test]
    fn http_body_without_content_length_is_saved() {
        const RESPONSE: &str = concat!(
            "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n",
            "{\"ctx\": \"a\", \"endings\": [\"b\", \"c\", \"d\", \"e\"], \"label\": 0}\n",
        );
        let dir = TempDir::new().unwrap();
        let (base_url, server) = serve_once(RESPONSE);
        let fetcher = Fetcher::new(dir.path(), http())
            .with_base_url(base_url)
            .with_progress(false);

        let path = fetcher.ensure_local(Split::Val).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), BODY);
        assert_eq!(dir_entries(dir.path()), vec!["hellaswag_val.jsonl".to_string()]);
        server.join().unwrap();
    }

    #[test]
    fn http_body_shorter_than_content_length_is_not_committed() {
        let dir = TempDir::new().unwrap();
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nabc",
        );
        let fetcher = Fetcher::new(dir.path(), http())
            .with_base_url(base_url)
            .with_progress(false);

        let err = fetcher.ensure_local(Split::Val).unwrap_err();
        server.join().unwrap();

        // ureq reports the early close itself; either way nothing is kept
        assert!(matches!(
            err,
            FetchError::Body { .. } | FetchError::Truncated { .. }
        ));
        assert!(!fetcher.local_path(Split::Val).exists());
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[test]
    fn http_status_is_reported() {
        let dir = TempDir::new().unwrap();
        let (base_url, server) = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let fetcher = Fetcher::new(dir.path(), http())
            .with_base_url(base_url)
            .with_progress(false);

        let err = fetcher.ensure_local(Split::Test).unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert!(dir_entries(dir.path()).is_empty());
    }
}
