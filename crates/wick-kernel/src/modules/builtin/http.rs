//! cnc:http: fetch a URL and return the body lines.

use async_trait::async_trait;
use wick_types::{ModuleKind, ModuleMetadata, ModuleOptions};

use crate::modules::{Module, ModuleError, ResultBuffer};

/// GETs through the run-wide client, which carries the proxy and timeout.
pub struct HttpConnector {
    url: String,
    client: reqwest::Client,
    buffer: ResultBuffer,
}

impl HttpConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            url: String::new(),
            client,
            buffer: ResultBuffer::new(),
        }
    }
}

/// Prefix `http://` when the input has no scheme.
fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    }
}

fn classify(url: &str, err: reqwest::Error) -> ModuleError {
    if err.is_timeout() {
        ModuleError::Timeout(url.to_string())
    } else if err.is_connect() || err.is_request() {
        ModuleError::Request(format!("{}: {}", url, err))
    } else {
        ModuleError::Failed(format!("{}: {}", url, err))
    }
}

#[async_trait]
impl Module for HttpConnector {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new("http", ModuleKind::Connector, "GET the input URL, return body lines")
    }

    fn configure(&mut self, options: ModuleOptions) {
        // Chained input may carry several lines; the first is the URL.
        self.url = options
            .data
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(normalize_url)
            .unwrap_or_default();
        self.buffer.set_accumulate(options.accumulate);
    }

    async fn run(&mut self) -> Result<(), ModuleError> {
        self.buffer.begin();
        if self.url.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| classify(&self.url, e))?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(ModuleError::Failed(format!("{}: HTTP {}", self.url, status)));
        }

        let body = response.text().await.map_err(|e| classify(&self.url, e))?;
        for line in body.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()) {
            self.buffer.push(line);
        }
        Ok(())
    }

    fn results(&self) -> &[String] {
        self.buffer.as_slice()
    }
}
