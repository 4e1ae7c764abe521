//! Human-oriented op summaries for telemetry.

use std::fmt;

use bson::Document;

/// Summary of an op: what kind it is, where it went, and what it carried.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct OpMetadata {
    /// Operation kind (`"query"`, `"insert"`, `"command"`, `"getmore"`, ...).
    pub op: &'static str,
    /// Namespace (`db.collection`) or database for commands.
    pub namespace: String,
    /// Command name for command-style ops, empty otherwise.
    pub command: String,
    /// Primary body document, if the op has one.
    pub data: Option<Document>,
}

impl OpMetadata {
    /// Build a summary with no body.
    pub fn new(op: &'static str, namespace: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            op,
            namespace: namespace.into(),
            command: command.into(),
            data: None,
        }
    }

    /// Attach the body document.
    pub fn with_data(mut self, data: Document) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for OpMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        if !self.namespace.is_empty() {
            write!(f, " {}", self.namespace)?;
        }
        if !self.command.is_empty() {
            write!(f, " {}", self.command)?;
        }
        if let Some(data) = &self.data {
            write!(f, " {data}")?;
        }
        Ok(())
    }
}

/// Truncate `s` to at most `n` characters, marking the cut with `...`.
pub fn abbreviate(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_owned();
    }
    if n <= 3 {
        return s.chars().take(n).collect();
    }
    let mut out: String = s.chars().take(n - 3).collect();
    out.push_str("...");
    out
}
