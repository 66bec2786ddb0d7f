use std::io::Read;
use std::time::Duration;

use sitewatch_core::redact::{RedactingWriter, RedactionRules, RedactionStats};
use sitewatch_core::{Error, Result};
use tracing::{debug, info};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Where documents come from. The HTTP implementation is [`HttpSource`].
pub trait Source {
    /// Start a GET for `url` and return its body. Connection and status
    /// failures are reported here; body read failures surface from the reader.
    fn open(&self, url: &str) -> Result<Box<dyn Read>>;
}

/// Plain HTTP(S) GET with a global deadline and a body size cap.
pub struct HttpSource {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl HttpSource {
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self { agent, max_bytes }
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_BYTES)
    }
}

impl Source for HttpSource {
    fn open(&self, url: &str) -> Result<Box<dyn Read>> {
        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::StatusCode(code) => Error::fetch(url, format!("HTTP status {code}")),
            other => Error::fetch(url, other),
        })?;
        debug!(url, status = %response.status(), "response received");
        let reader = response
            .into_body()
            .into_with_config()
            .limit(self.max_bytes)
            .reader();
        Ok(Box::new(reader))
    }
}

/// A downloaded document after redaction.
#[derive(Debug)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub downloaded: u64,
    pub stats: RedactionStats,
}

/// Download `url` and stream it through the redaction filter into memory.
///
/// Nothing is written to disk here; the caller persists the result only after
/// the whole body arrived and redaction completed, so a failed fetch leaves
/// the previous snapshot intact.
pub fn fetch_redacted(source: &dyn Source, url: &str, rules: &RedactionRules) -> Result<Fetched> {
    let mut body = source.open(url)?;
    let mut writer = RedactingWriter::new(Vec::new(), rules);
    // The Vec sink cannot fail, so any copy error is a read error.
    let downloaded = std::io::copy(&mut body, &mut writer).map_err(|e| Error::fetch(url, e))?;
    let (bytes, stats) = writer.finish()?;
    info!(
        url,
        downloaded,
        written = stats.written,
        redactions = stats.redactions,
        elided = stats.elided,
        "downloaded document"
    );
    Ok(Fetched {
        bytes,
        downloaded,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    const PAGE: &[u8] =
        br#"<form><input id="__VIEWSTATE" type="hidden" value="abc123"/><h2>test</h2></form>"#;
    const PAGE_REDACTED: &[u8] =
        br#"<form><input id="__VIEWSTATE" type="hidden" value=""/><h2>test</h2></form>"#;

    /// Yields the body one byte per read.
    struct Trickle(Vec<u8>, usize);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.1 >= self.0.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0[self.1];
            self.1 += 1;
            Ok(1)
        }
    }

    struct BrokenBody;

    impl Read for BrokenBody {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    enum Fake {
        Trickle(&'static [u8]),
        Broken,
        Refused,
    }

    impl Source for Fake {
        fn open(&self, url: &str) -> Result<Box<dyn Read>> {
            match self {
                Fake::Trickle(b) => Ok(Box::new(Trickle(b.to_vec(), 0))),
                Fake::Broken => Ok(Box::new(BrokenBody)),
                Fake::Refused => Err(Error::fetch(url, "connection refused")),
            }
        }
    }

    /// Serve one canned HTTP response on a local port.
    fn serve_once(status: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let mut stream = stream;
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            // The client may hang up early (body cap); ignore write errors.
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(body);
        });
        format!("http://{addr}/page")
    }

    #[test]
    fn trickled_body_is_redacted() {
        let fetched = fetch_redacted(
            &Fake::Trickle(PAGE),
            "http://example.test/",
            &RedactionRules::default(),
        )
        .unwrap();
        assert_eq!(fetched.bytes, PAGE_REDACTED);
        assert_eq!(fetched.downloaded, PAGE.len() as u64);
        assert_eq!(fetched.stats.written, PAGE_REDACTED.len() as u64);
    }

    #[test]
    fn body_read_failure_is_fetch_error() {
        let err = fetch_redacted(&Fake::Broken, "http://example.test/", &RedactionRules::default())
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[test]
    fn open_failure_propagates() {
        let err = fetch_redacted(&Fake::Refused, "http://example.test/", &RedactionRules::default())
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn http_source_downloads_and_redacts() {
        let url = serve_once("200 OK", PAGE);
        let source = HttpSource::new(Duration::from_secs(5), DEFAULT_MAX_BYTES);
        let fetched = fetch_redacted(&source, &url, &RedactionRules::default()).unwrap();
        assert_eq!(fetched.bytes, PAGE_REDACTED);
    }

    #[test]
    fn http_source_non_success_status_is_fetch_error() {
        let url = serve_once("404 Not Found", b"missing");
        let source = HttpSource::new(Duration::from_secs(5), DEFAULT_MAX_BYTES);
        let err = fetch_redacted(&source, &url, &RedactionRules::default()).unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn http_source_enforces_body_cap() {
        let url = serve_once("200 OK", PAGE);
        let source = HttpSource::new(Duration::from_secs(5), 8);
        let err = fetch_redacted(&source, &url, &RedactionRules::default()).unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }
}
