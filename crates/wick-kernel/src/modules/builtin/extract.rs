//! ext:* regex extractors.
//!
//! Results are unique matches, in order of first appearance.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use wick_types::{ModuleKind, ModuleMetadata, ModuleOptions};

use crate::modules::{Module, ModuleError, ResultBuffer};

static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:https?|ftp)://[^\s<>"'`]+"#).expect("valid url regex")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("valid email regex")
});

static IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b")
        .expect("valid ipv4 regex")
});

static DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}\b")
        .expect("valid domain regex")
});

static HASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[a-fA-F0-9]{64}|[a-fA-F0-9]{40}|[a-fA-F0-9]{32})\b").expect("valid hash regex")
});

/// A module that returns every match of one pattern in its input.
pub struct Extractor {
    name: &'static str,
    description: &'static str,
    pattern: &'static LazyLock<Regex>,
    trim: &'static [char],
    data: String,
    buffer: ResultBuffer,
}

impl Extractor {
    fn new(
        name: &'static str,
        description: &'static str,
        pattern: &'static LazyLock<Regex>,
        trim: &'static [char],
    ) -> Self {
        Self {
            name,
            description,
            pattern,
            trim,
            data: String::new(),
            buffer: ResultBuffer::new(),
        }
    }

    pub fn url() -> Self {
        // Trailing punctuation is almost always sentence text, not URL.
        Self::new("url", "URLs (http, https, ftp)", &URL, &['.', ',', ';', ':', ')', ']', '}', '!', '?'])
    }

    pub fn email() -> Self {
        Self::new("email", "Email addresses", &EMAIL, &[])
    }

    pub fn ipv4() -> Self {
        Self::new("ipv4", "IPv4 addresses", &IPV4, &[])
    }

    pub fn domain() -> Self {
        Self::new("domain", "Domain names", &DOMAIN, &[])
    }

    pub fn hash() -> Self {
        Self::new("hash", "MD5, SHA-1 and SHA-256 hex digests", &HASH, &[])
    }
}

#[async_trait]
impl Module for Extractor {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new(self.name, ModuleKind::Extractor, self.description)
    }

    fn configure(&mut self, options: ModuleOptions) {
        self.data = options.data;
        self.buffer.set_accumulate(options.accumulate);
    }

    async fn run(&mut self) -> Result<(), ModuleError> {
        self.buffer.begin();
        for m in self.pattern.find_iter(&self.data) {
            let value = m.as_str().trim_end_matches(self.trim);
            if !value.is_empty() {
                self.buffer.push_unique(value);
            }
        }
        Ok(())
    }

    fn results(&self) -> &[String] {
        self.buffer.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn extract(mut module: Extractor, data: &str) -> Vec<String> {
        module.configure(ModuleOptions::new(data));
        module.run().await.unwrap();
        module.results().to_vec()
    }

    #[tokio::test]
    async fn test_url_none_in_bare_domain() {
        assert!(extract(Extractor::url(), "example.com").await.is_empty());
    }

    #[tokio::test]
    async fn test_url_unique_and_trimmed() {
        let out = extract(
            Extractor::url(),
            "see https://a.example.com/x?y=1, and (http://b.test.org). again https://a.example.com/x?y=1",
        )
        .await;
        assert_eq!(out, vec!["https://a.example.com/x?y=1", "http://b.test.org"]);
    }

    #[tokio::test]
    async fn test_email() {
        let out = extract(Extractor::email(), "contact: Admin@Example.com, root@test.org").await;
        assert_eq!(out, vec!["Admin@Example.com", "root@test.org"]);
    }

    #[tokio::test]
    async fn test_ipv4_rejects_out_of_range() {
        let out = extract(Extractor::ipv4(), "10.0.0.1 and 999.1.1.1 and 192.168.1.254").await;
        assert_eq!(out, vec!["10.0.0.1", "192.168.1.254"]);
    }

    #[tokio::test]
    async fn test_domain() {
        let out = extract(Extractor::domain(), "example.com test.org").await;
        assert_eq!(out, vec!["example.com", "test.org"]);
    }

    #[tokio::test]
    async fn test_hash_lengths() {
        let md5 = "d41d8cd98f00b204e9800998ecf8427e";
        let sha256 = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let out = extract(Extractor::hash(), &format!("{} {} deadbeef", md5, sha256)).await;
        assert_eq!(out, vec![md5, sha256]);
    }

    #[tokio::test]
    async fn test_rerun_clears_unless_accumulating() {
        let mut module = Extractor::domain();
        module.configure(ModuleOptions::new("a.com"));
        module.run().await.unwrap();
        module.configure(ModuleOptions::new("b.com"));
        module.run().await.unwrap();
        assert_eq!(module.results(), &["b.com".to_string()]);

        let mut opts = ModuleOptions::new("c.com");
        opts.accumulate = true;
        module.configure(opts);
        module.run().await.unwrap();
        assert_eq!(module.results(), &["b.com".to_string(), "c.com".to_string()]);
    }
}
