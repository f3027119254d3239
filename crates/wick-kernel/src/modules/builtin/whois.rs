//! clc:whois: WHOIS lookup over TCP port 43.
//!
//! Asks the IANA server first and follows one `refer:` hop to the registry
//! that actually holds the record.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wick_types::{ModuleKind, ModuleMetadata, ModuleOptions};

use crate::modules::{Module, ModuleError, ResultBuffer};

const DEFAULT_SERVER: &str = "whois.iana.org";
const WHOIS_PORT: u16 = 43;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
/// Responses past this size are truncated.
const MAX_RESPONSE: u64 = 256 * 1024;

pub struct Whois {
    data: String,
    server: String,
    timeout: Duration,
    buffer: ResultBuffer,
}

impl Whois {
    pub fn new() -> Self {
        Self {
            data: String::new(),
            server: DEFAULT_SERVER.to_string(),
            timeout: DEFAULT_TIMEOUT,
            buffer: ResultBuffer::new(),
        }
    }

    async fn query(&self, server: &str, query: &str) -> Result<String, ModuleError> {
        let exchange = async {
            let mut stream = TcpStream::connect(server_address(server))
                .await
                .map_err(|e| ModuleError::Request(format!("{}: {}", server, e)))?;
            stream
                .write_all(format!("{}\r\n", query).as_bytes())
                .await
                .map_err(|e| ModuleError::Request(format!("{}: {}", server, e)))?;

            let mut raw = Vec::new();
            stream
                .take(MAX_RESPONSE)
                .read_to_end(&mut raw)
                .await
                .map_err(|e| ModuleError::Request(format!("{}: {}", server, e)))?;
            Ok(String::from_utf8_lossy(&raw).into_owned())
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ModuleError::Timeout(format!("{} after {:?}", server, self.timeout)))?
    }
}

impl Default for Whois {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for Whois {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new("whois", ModuleKind::Collector, "WHOIS record lines for a domain or IP")
    }

    fn configure(&mut self, options: ModuleOptions) {
        self.data = options.data.trim().to_string();
        if let Some(server) = options.extra("whois_server") {
            self.server = server.to_string();
        }
        if let Some(secs) = options.extra("whois_timeout").and_then(|s| s.parse().ok()) {
            self.timeout = Duration::from_secs(secs);
        }
        self.buffer.set_accumulate(options.accumulate);
    }

    async fn run(&mut self) -> Result<(), ModuleError> {
        self.buffer.begin();
        if self.data.is_empty() {
            return Ok(());
        }

        let mut response = self.query(&self.server, &self.data).await?;
        if let Some(refer) = referral(&response)
            && !refer.eq_ignore_ascii_case(&self.server)
        {
            tracing::debug!("whois {}: following referral to {}", self.data, refer);
            response = self.query(&refer, &self.data).await?;
        }

        for line in record_lines(&response) {
            self.buffer.push(line);
        }
        Ok(())
    }

    fn results(&self) -> &[String] {
        self.buffer.as_slice()
    }
}

/// `host` gets the standard port; `host:port` is used as given.
fn server_address(server: &str) -> String {
    if server.contains(':') {
        server.to_string()
    } else {
        format!("{}:{}", server, WHOIS_PORT)
    }
}

/// The `refer:` (or `whois:`) server named in an IANA response.
fn referral(response: &str) -> Option<String> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        ((key == "refer" || key == "whois") && !value.is_empty()).then(|| value.to_string())
    })
}

/// Non-empty, non-comment lines of a response.
fn record_lines(response: &str) -> impl Iterator<Item = &str> {
    response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('%') && !line.starts_with('#'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const IANA_SAMPLE: &str = "% IANA WHOIS server\n\
        % for more information on IANA, visit http://www.iana.org\n\
        \n\
        refer:        whois.verisign-grs.com\n\
        \n\
        domain:       COM\n";

    #[test]
    fn test_referral() {
        assert_eq!(referral(IANA_SAMPLE).as_deref(), Some("whois.verisign-grs.com"));
        assert_eq!(referral("domain: X\n"), None);
    }

    #[test]
    fn test_record_lines_skip_comments() {
        let lines: Vec<&str> = record_lines(IANA_SAMPLE).collect();
        assert_eq!(lines, vec!["refer:        whois.verisign-grs.com", "domain:       COM"]);
    }

    #[test]
    fn test_server_address() {
        assert_eq!(server_address("whois.iana.org"), "whois.iana.org:43");
        assert_eq!(server_address("127.0.0.1:4343"), "127.0.0.1:4343");
    }

    #[tokio::test]
    async fn test_empty_input_no_query() {
        let mut module = Whois::new();
        module.configure(ModuleOptions::new("   "));
        module.run().await.unwrap();
        assert!(module.results().is_empty());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let module = Whois::new();
        let err = module
            .query(&format!("127.0.0.1:{}", port), "example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Request(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_lookup_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut query = [0u8; 64];
            let _ = socket.read(&mut query).await.unwrap();
            socket
                .write_all(b"% comment\r\ndomain: EXAMPLE.COM\r\n\r\nstatus: active\r\n")
                .await
                .unwrap();
        });

        let mut options = ModuleOptions::new("example.com\n");
        options.extra.insert("whois_server".into(), addr.to_string());
        let mut module = Whois::new();
        module.configure(options);
        module.run().await.unwrap();
        assert_eq!(module.results(), &["domain: EXAMPLE.COM".to_string(), "status: active".to_string()]);
    }
}
