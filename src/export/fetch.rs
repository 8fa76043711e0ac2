use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use reqwest::Url;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FetchFailure;
use crate::export::config::FetchConfig;

/// The file host turns away default client identifiers, so every fetch goes
/// out looking like a desktop browser.
pub const BROWSER_HEADERS: [(&str, &str); 4] = [
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    ),
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("accept-language", "en-US,en;q=0.5"),
    ("referer", "https://www.google.com"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlDisposition {
    Fetch,
    NotHttp,
    Untrusted,
}

/// Absolute `http(s)` URL with a host.
pub fn is_http_url(url: &str) -> bool {
    Url::parse(url.trim())
        .is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
}

pub fn classify_url(url: &str, trusted_hosts: &[String]) -> UrlDisposition {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return UrlDisposition::NotHttp;
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return UrlDisposition::NotHttp;
    }
    let Some(host) = parsed.host_str() else {
        return UrlDisposition::NotHttp;
    };

    let trusted = trusted_hosts.iter().map(|h| h.trim()).any(|h| {
        !h.is_empty()
            && (host.eq_ignore_ascii_case(h)
                || host
                    .to_ascii_lowercase()
                    .ends_with(&format!(".{}", h.to_ascii_lowercase())))
    });
    if trusted {
        UrlDisposition::Fetch
    } else {
        UrlDisposition::Untrusted
    }
}

/// Extension of the URL path (`.png`), ignoring query and fragment.
pub fn url_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 16 || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{ext}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not an http(s) URL on a trusted host; there is nothing to download.
    PassThrough,
    Downloaded { bytes: u64 },
    Failed(FetchFailure),
}

pub trait Fetcher: Send + Sync {
    /// One attempt, no retries. Never panics or errors past this boundary.
    fn fetch(&self, url: &str, destination: &Path) -> FetchOutcome;
}

pub struct HttpFetcher {
    client: Client,
    trusted_hosts: Vec<String>,
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    let [ua, accept, lang, referer] = BROWSER_HEADERS;
    headers.insert(USER_AGENT, HeaderValue::from_static(ua.1));
    headers.insert(ACCEPT, HeaderValue::from_static(accept.1));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(lang.1));
    headers.insert(REFERER, HeaderValue::from_static(referer.1));
    headers
}

impl HttpFetcher {
    pub fn new(cfg: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .default_headers(browser_headers())
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            trusted_hosts: cfg.trusted_hosts.clone(),
        })
    }

    fn download(&self, url: &str, destination: &Path) -> Result<u64, FetchFailure> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| FetchFailure::Io(err.to_string()))?;
        }

        let mut response = self.client.get(url).send().map_err(transport_failure)?;
        if response.status() != StatusCode::OK {
            return Err(FetchFailure::HttpStatus(response.status().as_u16()));
        }

        let partial = partial_path(destination);
        let copied = match write_body(&mut response, &partial) {
            Ok(0) => Err(FetchFailure::EmptyBody),
            other => other,
        };
        if let Err(failure) = copied {
            let _ = fs::remove_file(&partial);
            return Err(failure);
        }

        fs::rename(&partial, destination).map_err(|err| {
            let _ = fs::remove_file(&partial);
            FetchFailure::Io(err.to_string())
        })?;

        match fs::metadata(destination) {
            Ok(meta) if meta.len() > 0 => Ok(meta.len()),
            Ok(_) => {
                let _ = fs::remove_file(destination);
                Err(FetchFailure::EmptyBody)
            }
            Err(err) => Err(FetchFailure::Io(err.to_string())),
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> FetchOutcome {
        match classify_url(url, &self.trusted_hosts) {
            UrlDisposition::Fetch => {}
            disposition => {
                tracing::debug!(url, ?disposition, "nothing to fetch");
                return FetchOutcome::PassThrough;
            }
        }

        tracing::debug!(url, destination = %destination.display(), "downloading");
        match self.download(url, destination) {
            Ok(bytes) => FetchOutcome::Downloaded { bytes },
            Err(failure) => FetchOutcome::Failed(failure),
        }
    }
}

fn write_body(response: &mut Response, partial: &Path) -> Result<u64, FetchFailure> {
    let mut file = fs::File::create(partial).map_err(|err| FetchFailure::Io(err.to_string()))?;
    response.copy_to(&mut file).map_err(transport_failure)
}

/// Hidden sibling the body streams into; the cache index ignores dotfiles.
fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    destination.with_file_name(format!(".{name}.part"))
}

fn transport_failure(err: reqwest::Error) -> FetchFailure {
    if err.is_timeout() {
        return FetchFailure::Timeout;
    }
    if let Some(status) = err.status() {
        return FetchFailure::HttpStatus(status.as_u16());
    }
    FetchFailure::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_urls_need_scheme_and_host() {
        assert!(is_http_url("https://files.slack.com/a.png"));
        assert!(is_http_url(" http://example.com "));
        assert!(!is_http_url("javascript:alert(1)"));
        assert!(!is_http_url("file:///etc/passwd"));
        assert!(!is_http_url("files/F1-a.png"));
    }
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use tempfile::tempdir;

    fn hosts(list: &[&str]) -> Vec<String> {
        list.iter().map(|h| h.to_string()).collect()
    }

    fn local_fetcher(timeout_secs: u64) -> HttpFetcher {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(browser_headers())
            .no_proxy()
            .build()
            .expect("client");
        HttpFetcher {
            client,
            trusted_hosts: hosts(&["127.0.0.1"]),
        }
    }

    /// Serves one canned response and hands back the raw request text.
    fn serve_once(response: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut chunk).expect("read");
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            stream.write_all(response.as_bytes()).expect("write");
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn classify_url_applies_allow_list() {
        let trusted = hosts(&["slack.com", "slack-edge.com"]);
        assert_eq!(
            classify_url("https://files.slack.com/files-pri/T1-F1/x.png", &trusted),
            UrlDisposition::Fetch
        );
        assert_eq!(
            classify_url("https://a.slack-edge.com/emoji.png", &trusted),
            UrlDisposition::Fetch
        );
        assert_eq!(
            classify_url("https://example.com/x.png", &trusted),
            UrlDisposition::Untrusted
        );
        assert_eq!(
            classify_url("https://notslack.com/x.png", &trusted),
            UrlDisposition::Untrusted
        );
        assert_eq!(classify_url("", &trusted), UrlDisposition::NotHttp);
        assert_eq!(
            classify_url("ftp://files.slack.com/x.png", &trusted),
            UrlDisposition::NotHttp
        );
    }

    #[test]
    fn url_extension_ignores_query() {
        assert_eq!(
            url_extension("https://files.slack.com/a/b/photo.JPG?t=xoxe"),
            Some(".JPG".to_string())
        );
        assert_eq!(url_extension("https://files.slack.com/a/download"), None);
        assert_eq!(url_extension("not a url"), None);
    }

    #[test]
    fn untrusted_url_passes_through_without_network() {
        let tmp = tempdir().expect("tempdir");
        let fetcher = HttpFetcher::new(&FetchConfig::default()).expect("fetcher");
        let dest = tmp.path().join("files/x.png");
        assert_eq!(
            fetcher.fetch("https://example.com/x.png", &dest),
            FetchOutcome::PassThrough
        );
        assert_eq!(fetcher.fetch("not-a-url", &dest), FetchOutcome::PassThrough);
        assert!(!dest.exists());
    }

    #[test]
    fn downloads_body_with_browser_headers() {
        let (base, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello");
        let tmp = tempdir().expect("tempdir");
        let dest = tmp.path().join("files/F1-hello.txt");

        let got = local_fetcher(10).fetch(&format!("{base}/hello.txt"), &dest);
        assert_eq!(got, FetchOutcome::Downloaded { bytes: 5 });
        assert_eq!(fs::read_to_string(&dest).expect("read"), "hello");
        assert!(!tmp.path().join("files/.F1-hello.txt.part").exists());

        let request = server.join().expect("server").to_ascii_lowercase();
        assert!(request.starts_with("get /hello.txt"));
        assert!(request.contains("user-agent: mozilla/5.0"));
        assert!(request.contains("accept-language: en-us,en;q=0.5"));
        assert!(request.contains("referer: https://www.google.com"));
    }

    #[test]
    fn empty_body_is_a_failure() {
        let (base, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let tmp = tempdir().expect("tempdir");
        let dest = tmp.path().join("F2.bin");

        let got = local_fetcher(10).fetch(&format!("{base}/empty"), &dest);
        server.join().expect("server");
        assert_eq!(got, FetchOutcome::Failed(FetchFailure::EmptyBody));
        assert!(!dest.exists());
    }

    #[test]
    fn http_error_status_is_a_failure() {
        let (base, server) = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found",
        );
        let tmp = tempdir().expect("tempdir");
        let dest = tmp.path().join("F3.bin");

        let got = local_fetcher(10).fetch(&format!("{base}/missing"), &dest);
        server.join().expect("server");
        assert_eq!(got, FetchOutcome::Failed(FetchFailure::HttpStatus(404)));
        assert!(!dest.exists());
    }

    #[test]
    fn refused_connection_is_a_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let tmp = tempdir().expect("tempdir");

        let got = local_fetcher(2).fetch(&format!("http://{addr}/gone.png"), &tmp.path().join("x"));
        assert!(matches!(
            got,
            FetchOutcome::Failed(FetchFailure::Transport(_) | FetchFailure::Timeout)
        ));
    }
}
