//! Exposition Parser
//!
//! Parses the text pull format back into samples. Parsing is per-line:
//! a malformed line is skipped and counted, it never fails the scrape.
//! A line may carry an optional trailing millisecond timestamp; lines
//! without one are stamped by the caller at scrape time.

use tracing::debug;

use crate::domain::model::Labels;

/// One sample parsed from an exposition line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSample {
    pub name: String,
    pub labels: Labels,
    pub value: f64,
    /// Source timestamp, when the line carried one.
    pub timestamp_ms: Option<i64>,
}

/// Result of parsing one exposition payload.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub samples: Vec<ParsedSample>,
    /// Lines that were present but unparseable.
    pub skipped_lines: usize,
}

/// Parse a full exposition payload.
pub fn parse_exposition(text: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Some(sample) => outcome.samples.push(sample),
            None => {
                debug!("Skipping malformed exposition line: {}", line);
                outcome.skipped_lines += 1;
            }
        }
    }

    outcome
}

/// Parse one `name[{labels}] value [timestamp_ms]` line.
fn parse_line(line: &str) -> Option<ParsedSample> {
    let (name, labels, rest) = match line.find('{') {
        Some(open) => {
            let close = find_closing_brace(line, open)?;
            let name = line[..open].trim();
            let labels = parse_labels(&line[open + 1..close])?;
            (name, labels, line[close + 1..].trim())
        }
        None => {
            let mut parts = line.splitn(2, char::is_whitespace);
            let name = parts.next()?;
            (name, Labels::empty(), parts.next()?.trim())
        }
    };

    if !valid_metric_name(name) {
        return None;
    }

    let mut parts = rest.split_whitespace();
    let value: f64 = parts.next()?.parse().ok()?;
    let timestamp_ms = match parts.next() {
        Some(ts) => Some(ts.parse::<i64>().ok()?),
        None => None,
    };
    // Anything after the timestamp is junk
    if parts.next().is_some() {
        return None;
    }

    Some(ParsedSample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

/// Find the `}` closing the label block, honoring quoted values.
fn find_closing_brace(line: &str, open: usize) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open + 1) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_quotes => escaped = true,
            b'"' => in_quotes = !in_quotes,
            b'}' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

/// Parse the inside of a label block: `key="value",key2="value2"`.
fn parse_labels(inner: &str) -> Option<Labels> {
    let mut labels = Labels::empty();
    let inner = inner.trim();
    if inner.is_empty() {
        return Some(labels);
    }

    let mut chars = inner.char_indices().peekable();
    loop {
        // key
        let start = chars.peek()?.0;
        let mut eq = None;
        for (i, c) in chars.by_ref() {
            if c == '=' {
                eq = Some(i);
                break;
            }
        }
        let eq = eq?;
        let key = inner[start..eq].trim();
        if key.is_empty() {
            return None;
        }

        // opening quote
        let (_, quote) = chars.next()?;
        if quote != '"' {
            return None;
        }

        // value, with escapes
        let mut value = String::new();
        let mut closed = false;
        while let Some((_, c)) = chars.next() {
            match c {
                '\\' => {
                    let (_, escaped) = chars.next()?;
                    match escaped {
                        'n' => value.push('\n'),
                        other => value.push(other),
                    }
                }
                '"' => {
                    closed = true;
                    break;
                }
                other => value.push(other),
            }
        }
        if !closed {
            return None;
        }

        labels.insert(key, value);

        match chars.next() {
            None => return Some(labels),
            Some((_, ',')) => {
                // skip whitespace before the next key
                while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
                    chars.next();
                }
            }
            Some(_) => return None,
        }
    }
}

/// Metric names: `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_bare_sample() {
        let outcome = parse_exposition("requests_total 42\n");
        assert_eq!(outcome.samples.len(), 1);
        assert_eq!(outcome.skipped_lines, 0);

        let sample = &outcome.samples[0];
        assert_eq!(sample.name, "requests_total");
        assert!(sample.labels.is_empty());
        assert_eq!(sample.value, 42.0);
        assert_eq!(sample.timestamp_ms, None);
    }

    #[test]
    fn test_parse_labeled_sample_with_timestamp() {
        let outcome =
            parse_exposition("http_requests_total{method=\"GET\",path=\"/x\"} 7 1700000000000\n");
        let sample = &outcome.samples[0];
        assert_eq!(sample.labels.get("method"), Some("GET"));
        assert_eq!(sample.labels.get("path"), Some("/x"));
        assert_eq!(sample.timestamp_ms, Some(1700000000000));
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let outcome = parse_exposition("# TYPE a counter\n\na 1\n");
        assert_eq!(outcome.samples.len(), 1);
        assert_eq!(outcome.skipped_lines, 0);
    }

    #[test]
    fn test_malformed_line_does_not_fail_payload() {
        let text = "good_metric 1\nthis is not a metric\nanother_good 2\n";
        let outcome = parse_exposition(text);
        assert_eq!(outcome.samples.len(), 2);
        assert_eq!(outcome.skipped_lines, 1);
    }

    #[test]
    fn test_brace_inside_quoted_value() {
        let outcome = parse_exposition("weird{path=\"a}b\"} 1\n");
        assert_eq!(outcome.samples.len(), 1);
        assert_eq!(outcome.samples[0].labels.get("path"), Some("a}b"));
    }

    #[test]
    fn test_escaped_quote_in_value() {
        let outcome = parse_exposition(r#"weird{msg="say \"hi\""} 1"#);
        assert_eq!(outcome.samples.len(), 1);
        assert_eq!(outcome.samples[0].labels.get("msg"), Some(r#"say "hi""#));
    }

    #[test]
    fn test_rejects_bad_name_and_bad_value() {
        assert_eq!(parse_exposition("9metric 1\n").skipped_lines, 1);
        assert_eq!(parse_exposition("metric abc\n").skipped_lines, 1);
        assert_eq!(parse_exposition("metric\n").skipped_lines, 1);
        assert_eq!(parse_exposition("metric 1 2 3\n").skipped_lines, 1);
    }

    #[test]
    fn test_roundtrip_with_exposition() {
        use crate::emitter::{exposition, MetricRegistry};

        let registry = MetricRegistry::new();
        let family = registry.register_counter("jobs_total").unwrap();
        family
            .with_labels(crate::domain::model::Labels::empty().with("queue", "default"))
            .add(5);

        let outcome = parse_exposition(&exposition::render(&registry));
        assert_eq!(outcome.skipped_lines, 0);
        assert_eq!(outcome.samples.len(), 1);
        assert_eq!(outcome.samples[0].value, 5.0);
    }

    proptest! {
        // The parser must never panic, whatever the payload.
        #[test]
        fn parse_never_panics(text in "\\PC{0,200}") {
            let _ = parse_exposition(&text);
        }

        // Any value/label the emitter can render must parse back.
        #[test]
        fn rendered_labels_always_parse(value in "[a-zA-Z0-9 /._-]{0,32}", count in 0u64..1000) {
            let line = format!("m{{k=\"{}\"}} {}", value, count);
            let outcome = parse_exposition(&line);
            prop_assert_eq!(outcome.samples.len(), 1);
            prop_assert_eq!(outcome.samples[0].labels.get("k"), Some(value.as_str()));
        }
    }
}
