//! Template engine: placeholder substitution and inline helper calls.
//!
//! A template is parsed once into segments and then rendered per target:
//!
//! ```text
//! "curl -s sha256({STRING}).example/{string}"
//!   ├── Literal("curl -s ")
//!   ├── Call { name: "sha256", args: [[Placeholder]] }
//!   ├── Literal(".example/")
//!   └── Placeholder
//! ```
//!
//! Rendering never re-scans substituted text, so a target containing the
//! placeholder token or something that looks like a call is inserted as-is.

mod functions;

pub use functions::{FunctionRegistry, HelperFunction};

use futures::future::BoxFuture;
use thiserror::Error;

use crate::context::ExecutionContext;

/// Default placeholder token, matched case-insensitively.
pub const DEFAULT_PLACEHOLDER: &str = "{STRING}";

/// Template parse and helper evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed call to {name}() at offset {offset}")]
    Unclosed { name: String, offset: usize },
    #[error("{name}() takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("{name}(): {message}")]
    Function { name: String, message: String },
}

/// One parsed piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder,
    Call { name: String, args: Vec<Vec<Segment>> },
}

/// Why a target produced no expanded text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A helper result did not contain the `iff` substring.
    FunctionFilter { function: String, needle: String },
    /// The expanded text was empty or only shell metacharacters.
    Rejected,
    /// The template itself could not be parsed.
    Malformed(TemplateError),
    /// A helper call failed.
    Function(TemplateError),
}

/// Result of expanding a template for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    Ready(String),
    Skipped(SkipReason),
}

impl Expansion {
    pub fn text(&self) -> Option<&str> {
        match self {
            Expansion::Ready(s) => Some(s),
            Expansion::Skipped(_) => None,
        }
    }
}

/// A parsed command template. Immutable and shared by all workers.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
    first_function: Option<String>,
    error: Option<TemplateError>,
}

impl Template {
    /// Parse `source`, recognizing `placeholder` and calls to helpers in `functions`.
    ///
    /// Parsing never fails outright: a malformed template is kept and every
    /// expansion of it is skipped with `SkipReason::Malformed`.
    pub fn parse(source: &str, placeholder: &str, functions: &FunctionRegistry) -> Self {
        let mut parser = Parser {
            src: source,
            pos: 0,
            placeholder,
            functions,
            first_function: None,
        };
        let (segments, error) = match parser.segments(false) {
            Ok(segments) => (segments, None),
            Err(e) => (vec![Segment::Literal(source.to_string())], Some(e)),
        };
        Self {
            segments,
            first_function: parser.first_function,
            error,
        }
    }

    /// Parse error, if the template is malformed.
    pub fn error(&self) -> Option<&TemplateError> {
        self.error.as_ref()
    }

    /// Name of the first helper called by this template.
    pub fn first_function(&self) -> Option<&str> {
        self.first_function.as_deref()
    }

    /// True if the template references the placeholder at all.
    pub fn has_placeholder(&self) -> bool {
        fn walk(segments: &[Segment]) -> bool {
            segments.iter().any(|s| match s {
                Segment::Placeholder => true,
                Segment::Call { args, .. } => args.iter().any(|a| walk(a)),
                Segment::Literal(_) => false,
            })
        }
        walk(&self.segments)
    }

    /// Expand the template for `target`.
    ///
    /// Records the first helper name in `ctx.function`. Honors `ctx.iff`.
    pub async fn expand(
        &self,
        target: &str,
        ctx: &mut ExecutionContext,
        functions: &FunctionRegistry,
    ) -> Expansion {
        if let Some(name) = &self.first_function {
            ctx.function = Some(name.clone());
        }
        if let Some(e) = &self.error {
            return Expansion::Skipped(SkipReason::Malformed(e.clone()));
        }

        let render = Render {
            target,
            iff: ctx.iff.as_deref(),
            functions,
        };
        let text = match render.segments(&self.segments, true).await {
            Ok(text) => text,
            Err(reason) => return Expansion::Skipped(reason),
        };

        match sanitize(&text) {
            Some(clean) => Expansion::Ready(clean),
            None => Expansion::Skipped(SkipReason::Rejected),
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    placeholder: &'a str,
    functions: &'a FunctionRegistry,
    first_function: Option<String>,
}

impl Parser<'_> {
    /// Parse until end of input, or (inside call args) until a top-level `,` or `)`.
    fn segments(&mut self, in_args: bool) -> Result<Vec<Segment>, TemplateError> {
        let mut out = Vec::new();
        let mut literal = String::new();
        let mut depth = 0usize;

        while self.pos < self.src.len() {
            let rest = &self.src[self.pos..];

            if !self.placeholder.is_empty()
                && rest
                    .get(..self.placeholder.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(self.placeholder))
            {
                flush(&mut literal, &mut out);
                out.push(Segment::Placeholder);
                self.pos += self.placeholder.len();
                continue;
            }

            if let Some((name, name_len)) = self.call_at(rest) {
                flush(&mut literal, &mut out);
                let start = self.pos;
                self.pos += name_len + 1; // name and '('
                if self.first_function.is_none() {
                    self.first_function = Some(name.clone());
                }
                let args = self.call_args(&name, start)?;
                out.push(Segment::Call { name, args });
                continue;
            }

            let Some(c) = rest.chars().next() else { break };
            if in_args {
                match c {
                    ',' | ')' if depth == 0 => break,
                    '(' => depth += 1,
                    ')' => depth -= 1,
                    _ => {}
                }
            }
            literal.push(c);
            self.pos += c.len_utf8();
        }

        flush(&mut literal, &mut out);
        Ok(out)
    }

    /// Parse comma-separated arguments up to the matching `)`.
    fn call_args(&mut self, name: &str, start: usize) -> Result<Vec<Vec<Segment>>, TemplateError> {
        let mut args = Vec::new();
        loop {
            let arg = self.segments(true)?;
            args.push(arg);
            match self.src[self.pos..].chars().next() {
                Some(',') => self.pos += 1,
                Some(')') => {
                    self.pos += 1;
                    break;
                }
                _ => {
                    return Err(TemplateError::Unclosed {
                        name: name.to_string(),
                        offset: start,
                    });
                }
            }
        }
        // `name()` is a call with no arguments, not one empty argument.
        if args.len() == 1 && args[0].is_empty() {
            args.clear();
        }
        Ok(args)
    }

    /// A registered helper name directly followed by `(`, starting at a word boundary.
    fn call_at(&self, rest: &str) -> Option<(String, usize)> {
        let prev = self.src[..self.pos].chars().next_back();
        if prev.is_some_and(is_ident_char) {
            return None;
        }
        let first = rest.chars().next()?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return None;
        }
        let len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
        let name = &rest[..len];
        if rest[len..].starts_with('(') && self.functions.contains(name) {
            Some((name.to_string(), len))
        } else {
            None
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn flush(literal: &mut String, out: &mut Vec<Segment>) {
    if !literal.is_empty() {
        out.push(Segment::Literal(std::mem::take(literal)));
    }
}

struct Render<'a> {
    target: &'a str,
    iff: Option<&'a str>,
    functions: &'a FunctionRegistry,
}

impl<'a> Render<'a> {
    /// `iff` is checked only against calls at the outer level; a nested
    /// call's result is an intermediate value.
    fn segments<'s>(
        &'s self,
        segments: &'s [Segment],
        outer: bool,
    ) -> BoxFuture<'s, Result<String, SkipReason>> {
        Box::pin(async move {
            let mut out = String::new();
            for segment in segments {
                match segment {
                    Segment::Literal(s) => out.push_str(s),
                    Segment::Placeholder => out.push_str(self.target),
                    Segment::Call { name, args } => {
                        let mut values = Vec::with_capacity(args.len());
                        for arg in args {
                            values.push(self.segments(arg, false).await?);
                        }
                        let result = self
                            .functions
                            .call(name, &values)
                            .await
                            .map_err(SkipReason::Function)?;
                        if outer
                            && let Some(needle) = self.iff
                            && !result.contains(needle)
                        {
                            return Err(SkipReason::FunctionFilter {
                                function: name.clone(),
                                needle: needle.to_string(),
                            });
                        }
                        out.push_str(&result);
                    }
                }
            }
            Ok(out)
        })
    }
}

/// Characters that on their own do not make a command.
const SHELL_META: &[char] = &[
    ';', '|', '&', '<', '>', '(', ')', '$', '`', '\\', '"', '\'', '*', '?', '!', '{', '}', '[',
    ']', '#', '~',
];

/// Clean expanded text for execution.
///
/// Newlines collapse to single spaces, other control characters are dropped.
/// Returns `None` for text that is empty or only shell metacharacters.
pub fn sanitize(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' | '\n' => {
                while chars.peek().is_some_and(|n| matches!(n, '\r' | '\n')) {
                    chars.next();
                }
                out.push(' ');
            }
            '\t' => out.push(' '),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    let trimmed = out.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed
        .chars()
        .all(|c| c.is_whitespace() || SHELL_META.contains(&c))
    {
        return None;
    }
    Some(trimmed.to_string())
}
