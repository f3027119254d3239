//! Helper functions callable from templates as `name(arg, ...)`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

use super::TemplateError;

/// A helper callable from a template.
#[async_trait]
pub trait HelperFunction: Send + Sync {
    /// Name used in templates.
    fn name(&self) -> &str;

    /// One-line description for `--list-functions`.
    fn description(&self) -> &str;

    /// Accepted argument count, inclusive.
    fn arity(&self) -> (usize, usize);

    async fn call(&self, args: &[String]) -> Result<String, String>;
}

/// Registry of helpers, keyed by name.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Arc<dyn HelperFunction>>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry populated with the built-in helpers.
    ///
    /// `http` is the run-wide client used by `http_get`.
    pub fn with_builtins(http: reqwest::Client) -> Self {
        let mut registry = Self::new();
        for f in pure_builtins() {
            registry.register(f);
        }
        registry.register(HttpGet { client: http });
        registry
    }

    pub fn register(&mut self, function: impl HelperFunction + 'static) {
        self.functions
            .insert(function.name().to_string(), Arc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// (name, description) pairs, sorted by name.
    pub fn list(&self) -> Vec<(&str, &str)> {
        self.functions
            .values()
            .map(|f| (f.name(), f.description()))
            .collect()
    }

    /// Call `name` with already-rendered arguments.
    pub async fn call(&self, name: &str, args: &[String]) -> Result<String, TemplateError> {
        let function = self.functions.get(name).ok_or_else(|| TemplateError::Function {
            name: name.to_string(),
            message: "no such function".to_string(),
        })?;

        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{}-{}", min, max)
            };
            return Err(TemplateError::Arity {
                name: name.to_string(),
                expected,
                got: args.len(),
            });
        }

        function
            .call(args)
            .await
            .map_err(|message| TemplateError::Function {
                name: name.to_string(),
                message,
            })
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A synchronous helper backed by a plain function pointer.
struct Pure {
    name: &'static str,
    description: &'static str,
    arity: (usize, usize),
    f: fn(&[String]) -> Result<String, String>,
}

#[async_trait]
impl HelperFunction for Pure {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn arity(&self) -> (usize, usize) {
        self.arity
    }

    async fn call(&self, args: &[String]) -> Result<String, String> {
        (self.f)(args)
    }
}

fn pure_builtins() -> Vec<Pure> {
    vec![
        Pure {
            name: "sha256",
            description: "SHA-256 hex digest",
            arity: (1, 1),
            f: |a| Ok(format!("{:x}", Sha256::digest(a[0].as_bytes()))),
        },
        Pure {
            name: "b64e",
            description: "Base64-encode",
            arity: (1, 1),
            f: |a| Ok(base64::engine::general_purpose::STANDARD.encode(a[0].as_bytes())),
        },
        Pure {
            name: "b64d",
            description: "Base64-decode (lossy UTF-8)",
            arity: (1, 1),
            f: |a| {
                base64::engine::general_purpose::STANDARD
                    .decode(a[0].trim().as_bytes())
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .map_err(|e| e.to_string())
            },
        },
        Pure {
            name: "urlencode",
            description: "Percent-encode for a query string",
            arity: (1, 1),
            f: |a| Ok(url::form_urlencoded::byte_serialize(a[0].as_bytes()).collect()),
        },
        Pure {
            name: "upper",
            description: "Uppercase",
            arity: (1, 1),
            f: |a| Ok(a[0].to_uppercase()),
        },
        Pure {
            name: "lower",
            description: "Lowercase",
            arity: (1, 1),
            f: |a| Ok(a[0].to_lowercase()),
        },
        Pure {
            name: "reverse",
            description: "Reverse characters",
            arity: (1, 1),
            f: |a| Ok(a[0].chars().rev().collect()),
        },
        Pure {
            name: "len",
            description: "Length in characters",
            arity: (1, 1),
            f: |a| Ok(a[0].chars().count().to_string()),
        },
        Pure {
            name: "trim",
            description: "Strip surrounding whitespace",
            arity: (1, 1),
            f: |a| Ok(a[0].trim().to_string()),
        },
        Pure {
            name: "randint",
            description: "Random integer in [lo, hi]",
            arity: (2, 2),
            f: randint,
        },
        Pure {
            name: "randstr",
            description: "Random alphanumeric string of length n",
            arity: (1, 1),
            f: randstr,
        },
        Pure {
            name: "uuid",
            description: "Random UUIDv4",
            arity: (0, 0),
            f: |_| Ok(uuid::Uuid::new_v4().to_string()),
        },
    ]
}

fn randint(args: &[String]) -> Result<String, String> {
    let lo: i64 = args[0].trim().parse().map_err(|_| format!("invalid integer '{}'", args[0]))?;
    let hi: i64 = args[1].trim().parse().map_err(|_| format!("invalid integer '{}'", args[1]))?;
    if lo > hi {
        return Err(format!("empty range {}..={}", lo, hi));
    }
    Ok(rand::rng().random_range(lo..=hi).to_string())
}

/// Longest string `randstr` will produce.
const MAX_RANDSTR_LEN: usize = 4096;

fn randstr(args: &[String]) -> Result<String, String> {
    let n: usize = args[0].trim().parse().map_err(|_| format!("invalid length '{}'", args[0]))?;
    if n > MAX_RANDSTR_LEN {
        return Err(format!("length {} exceeds {}", n, MAX_RANDSTR_LEN));
    }
    Ok(rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(n)
        .map(char::from)
        .collect())
}

/// `http_get(url)`: body of a GET request through the shared client.
struct HttpGet {
    client: reqwest::Client,
}

#[async_trait]
impl HelperFunction for HttpGet {
    fn name(&self) -> &str {
        "http_get"
    }

    fn description(&self) -> &str {
        "Body of an HTTP GET request"
    }

    fn arity(&self) -> (usize, usize) {
        (1, 1)
    }

    async fn call(&self, args: &[String]) -> Result<String, String> {
        let url = args[0].trim();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let response = response.error_for_status().map_err(|e| e.to_string())?;
        response.text().await.map_err(|e| e.to_string())
    }
}
