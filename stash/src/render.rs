//! Rendering of documents through a `%field` format template.
//!
//! A template such as `%@timestamp %source %message` is literal text with
//! field references. A reference is `%` followed by a run of
//! `[A-Za-z0-9@_.-]`; dots walk into nested objects.

use chrono::{DateTime, Local};
use crossterm::style::{Color, Stylize};
use serde_json::Value;
use tracing::trace;

use crate::expr::evaluate;
use crate::query::{MESSAGE_FIELD, REQUEST_ID_FIELD, SOURCE_FIELD};

/// Default format used by new profiles.
pub const DEFAULT_FORMAT: &str = "%@timestamp %x_request_id %source %message";

/// Width the local timestamp is padded to, so messages line up.
const TIMESTAMP_WIDTH: usize = 23;

/// A field reference inside a template.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    start: usize,
    end: usize,
}

/// A parsed format template. Parsing happens once; rendering reuses the token list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTemplate {
    format: String,
    tokens: Vec<Token>,
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '@' | '_' | '.' | '-')
}

impl RenderTemplate {
    pub fn parse(format: impl Into<String>) -> Self {
        let format = format.into();
        let mut tokens = Vec::new();
        let mut chars = format.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            if c != '%' {
                continue;
            }
            let mut end = i + 1;
            while let Some(&(j, next)) = chars.peek() {
                if !is_path_char(next) {
                    break;
                }
                end = j + next.len_utf8();
                chars.next();
            }
            if end > i + 1 {
                tokens.push(Token { start: i, end });
            }
        }

        Self { format, tokens }
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// Field paths referenced by the template, in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(|t| &self.format[t.start + 1..t.end])
    }
}

/// Turns documents into display lines.
#[derive(Debug, Clone)]
pub struct Renderer {
    template: RenderTemplate,
    timestamp_field: String,
    color: bool,
}

impl Renderer {
    pub fn new(template: RenderTemplate, timestamp_field: impl Into<String>) -> Self {
        Self {
            template,
            timestamp_field: timestamp_field.into(),
            color: true,
        }
    }

    /// Enable or disable terminal styling.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Render `doc`, highlighting every occurrence of `highlight` in the message.
    ///
    /// Fields that cannot be resolved render as empty strings.
    pub fn render(&self, doc: &Value, highlight: Option<&str>) -> String {
        let format = self.template.format();
        let mut out = String::with_capacity(format.len() * 2);
        let mut last = 0;

        for token in &self.template.tokens {
            out.push_str(&format[last..token.start]);
            let path = &format[token.start + 1..token.end];
            let value = match evaluate(doc, path) {
                Ok(value) => self.decorate(path, value, highlight),
                Err(e) => {
                    trace!(%path, error = %e, "field not rendered");
                    String::new()
                }
            };
            out.push_str(&value);
            last = token.end;
        }
        out.push_str(&format[last..]);
        out
    }

    fn decorate(&self, path: &str, value: String, highlight: Option<&str>) -> String {
        if path == self.timestamp_field {
            return match display_timestamp(&value) {
                Some(local) if self.color => local.green().to_string(),
                Some(local) => local,
                None => value,
            };
        }
        if !self.color || value.is_empty() {
            return value;
        }
        match path {
            REQUEST_ID_FIELD => value.magenta().to_string(),
            SOURCE_FIELD => value.cyan().to_string(),
            MESSAGE_FIELD => match highlight {
                Some(phrase) if !phrase.is_empty() => {
                    let styled = phrase.with(Color::Blue).on(Color::Cyan).to_string();
                    value.replace(phrase, &styled)
                }
                _ => value,
            },
            _ => value,
        }
    }
}

/// Convert a wire timestamp into padded local time (`2006-01-02 15:04:05.999`).
pub fn display_timestamp(wire: &str) -> Option<String> {
    let parsed = match DateTime::parse_from_rfc3339(wire) {
        Ok(parsed) => parsed,
        Err(e) => {
            trace!(%wire, error = %e, "timestamp not reformatted");
            return None;
        }
    };
    let local = parsed.with_timezone(&Local);

    let mut text = local.format("%Y-%m-%d %H:%M:%S").to_string();
    let millis = format!("{:03}", local.timestamp_subsec_millis());
    let millis = millis.trim_end_matches('0');
    if !millis.is_empty() {
        text.push('.');
        text.push_str(millis);
    }
    Some(format!("{:<width$}", text, width = TIMESTAMP_WIDTH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain(format: &str) -> Renderer {
        Renderer::new(RenderTemplate::parse(format), "@timestamp").with_color(false)
    }

    #[test]
    fn test_parse_tokens() {
        let t = RenderTemplate::parse(DEFAULT_FORMAT);
        let fields: Vec<&str> = t.fields().collect();
        assert_eq!(fields, vec!["@timestamp", "x_request_id", "source", "message"]);
    }

    #[test]
    fn test_parse_ignores_lone_sigil() {
        let t = RenderTemplate::parse("100% [%level] %");
        let fields: Vec<&str> = t.fields().collect();
        assert_eq!(fields, vec!["level"]);
    }

    #[test]
    fn test_substitutes_values_verbatim() {
        let r = plain("[%level] %source: %message");
        let doc = json!({"level": "WARN", "source": "api", "message": "disk low"});
        assert_eq!(r.render(&doc, None), "[WARN] api: disk low");
    }

    #[test]
    fn test_nested_field() {
        let r = plain("%ctx.user -> %message");
        let doc = json!({"ctx": {"user": "alice"}, "message": "login"});
        assert_eq!(r.render(&doc, None), "alice -> login");
    }

    #[test]
    fn test_missing_field_renders_empty() {
        let r = plain("<%missing> %source|%message");
        let doc = json!({"source": "api", "message": "hi"});
        assert_eq!(r.render(&doc, None), "<> api|hi");
    }

    #[test]
    fn test_repeated_token_substituted_everywhere() {
        let r = plain("%source/%source");
        let doc = json!({"source": "api"});
        assert_eq!(r.render(&doc, None), "api/api");
    }

    #[test]
    fn test_prefix_token_does_not_clobber_longer_token() {
        let r = plain("%source %source_host");
        let doc = json!({"source": "api", "source_host": "web-1"});
        assert_eq!(r.render(&doc, None), "api web-1");
    }

    #[test]
    fn test_timestamp_reformatted_and_padded() {
        let r = plain("%@timestamp|");
        let wire = "2024-01-02T03:04:05.120Z";
        let doc = json!({"@timestamp": wire});
        let local = DateTime::parse_from_rfc3339(wire).unwrap().with_timezone(&Local);
        let expected = format!("{}.12 |", local.format("%Y-%m-%d %H:%M:%S"));
        assert_eq!(r.render(&doc, None), expected);
    }

    #[test]
    fn test_timestamp_without_millis() {
        let text = display_timestamp("2024-01-02T03:04:05Z").unwrap();
        assert_eq!(text.len(), TIMESTAMP_WIDTH);
        assert!(!text.trim_end().contains('.'));
    }

    #[test]
    fn test_unparseable_timestamp_kept_raw() {
        let r = plain("%@timestamp");
        let doc = json!({"@timestamp": "not a time"});
        assert_eq!(r.render(&doc, None), "not a time");
    }

    #[test]
    fn test_highlight_wraps_phrase() {
        let r = Renderer::new(RenderTemplate::parse("%message"), "@timestamp");
        let doc = json!({"message": "db timeout, db timeout again"});
        let out = r.render(&doc, Some("db timeout"));
        let styled = "db timeout".with(Color::Blue).on(Color::Cyan).to_string();
        assert_eq!(out.matches(&styled).count(), 2);
    }

    #[test]
    fn test_highlight_only_touches_message() {
        let r = Renderer::new(RenderTemplate::parse("%level %message"), "@timestamp");
        let doc = json!({"level": "error", "message": "plain"});
        let out = r.render(&doc, Some("error"));
        assert!(out.starts_with("error "));
    }

    #[test]
    fn test_request_id_and_source_colored() {
        let r = Renderer::new(RenderTemplate::parse("%x_request_id %source"), "@timestamp");
        let doc = json!({"x_request_id": "4f2a9c1e", "source": "AuthService"});
        let expected = format!("{} {}", "4f2a9c1e".magenta(), "AuthService".cyan());
        assert_eq!(r.render(&doc, None), expected);
    }

    #[test]
    fn test_empty_request_id_and_source_not_styled() {
        let r = Renderer::new(RenderTemplate::parse("<%x_request_id|%source>"), "@timestamp");
        let doc = json!({"x_request_id": "", "source": ""});
        assert_eq!(r.render(&doc, None), "<|>");

        let missing = json!({"message": "hi"});
        assert_eq!(r.render(&missing, None), "<|>");
    }

    #[test]
    fn test_timestamp_colored() {
        let r = Renderer::new(RenderTemplate::parse("%@timestamp"), "@timestamp");
        let wire = "2024-01-02T03:04:05.120Z";
        let doc = json!({"@timestamp": wire});
        let expected = display_timestamp(wire).unwrap().green().to_string();
        assert_eq!(r.render(&doc, None), expected);
    }

    #[test]
    fn test_no_color_ignores_highlight() {
        let r = plain("%message");
        let doc = json!({"message": "db timeout"});
        assert_eq!(r.render(&doc, Some("timeout")), "db timeout");
    }
}
