//! Kernel command line parsing
//!
//! Parameters are whitespace separated `key` or `key=value` tokens. Double
//! quotes group whitespace into a single token and are stripped. A key that
//! appears more than once keeps every value in order.

use crate::error::{LinkError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Parsed kernel command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmdline {
    params: HashMap<String, Vec<String>>,
}

impl Cmdline {
    /// Parse a raw command line string
    pub fn parse(raw: &str) -> Self {
        let mut params: HashMap<String, Vec<String>> = HashMap::new();

        for token in tokenize(raw) {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (token, String::new()),
            };

            if key.is_empty() {
                continue;
            }

            params.entry(key).or_default().push(value);
        }

        Self { params }
    }

    /// Read and parse a command line file (normally `/proc/cmdline`)
    pub async fn read(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LinkError::Cmdline {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self::parse(&raw))
    }

    /// All values recorded for `key`
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.params.get(key).map(Vec::as_slice)
    }

    /// First value recorded for `key`
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Set `key` to a single value, replacing anything parsed before
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), vec![value.into()]);
    }
}

fn tokenize(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in raw.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}
