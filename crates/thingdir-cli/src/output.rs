//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde_json::Value;
use thingdir_core::Document;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a single document
    pub fn print_document(&self, id: &str, doc: &Document) {
        match self.format {
            OutputFormat::Human => {
                println!("ID: {}", id);
                println!("{}", pretty(&Value::Object(doc.clone())));
            }
            OutputFormat::Json => {
                println!("{}", pretty(&Value::Object(doc.clone())));
            }
            OutputFormat::Quiet => {
                println!("{}", id);
            }
        }
    }

    /// Print a page of documents
    pub fn print_documents(&self, docs: &[Document]) {
        match self.format {
            OutputFormat::Human => {
                if docs.is_empty() {
                    println!("No documents found.");
                    return;
                }
                for doc in docs {
                    println!(
                        "{} | {} | {}",
                        truncate(field(doc, "id"), 40),
                        truncate(type_of(doc), 20),
                        truncate(field(doc, "title"), 40)
                    );
                }
                println!("\n{} document(s)", docs.len());
            }
            OutputFormat::Json => {
                println!("{}", pretty(&serde_json::json!(docs)));
            }
            OutputFormat::Quiet => {
                for doc in docs {
                    println!("{}", field(doc, "id"));
                }
            }
        }
    }

    /// Print query results, which may be any JSON values
    pub fn print_values(&self, values: &[Value]) {
        match self.format {
            OutputFormat::Human => {
                if values.is_empty() {
                    println!("No matches.");
                    return;
                }
                for value in values {
                    println!("{}", pretty(value));
                }
                println!("\n{} match(es)", values.len());
            }
            OutputFormat::Json => {
                println!("{}", pretty(&Value::Array(values.to_vec())));
            }
            OutputFormat::Quiet => {
                for value in values {
                    match value {
                        Value::String(s) => println!("{}", s),
                        Value::Object(doc) => println!("{}", field(doc, "id")),
                        other => println!("{}", other),
                    }
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// A string field of a document, or "" if missing
fn field<'a>(doc: &'a Document, key: &str) -> &'a str {
    doc.get(key).and_then(Value::as_str).unwrap_or("")
}

/// `@type` of a Thing Description, falling back to `type`
fn type_of(doc: &Document) -> &str {
    match doc.get("@type").or_else(|| doc.get("type")) {
        Some(Value::String(s)) => s,
        Some(Value::Array(types)) => types.first().and_then(Value::as_str).unwrap_or(""),
        _ => "",
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("température élevée", 8), "tempé...");
    }

    #[test]
    fn test_type_of() {
        assert_eq!(type_of(&doc(json!({"@type": "saref:Sensor"}))), "saref:Sensor");
        assert_eq!(type_of(&doc(json!({"@type": ["Thing", "Lamp"]}))), "Thing");
        assert_eq!(type_of(&doc(json!({"type": "sensor"}))), "sensor");
        assert_eq!(type_of(&doc(json!({"title": "x"}))), "");
    }

    #[test]
    fn test_field() {
        let d = doc(json!({"id": "thing1", "n": 3}));
        assert_eq!(field(&d, "id"), "thing1");
        assert_eq!(field(&d, "n"), "");
        assert_eq!(field(&d, "title"), "");
    }
}
