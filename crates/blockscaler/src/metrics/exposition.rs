//! Line parser for the Prometheus text exposition format.
//!
//! Only sample lines are turned into families. `# HELP` and `# TYPE` headers
//! carry no sample and are reported as [`ParseError::Comment`] so callers can
//! skip them like any other unusable line.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line is empty")]
    Empty,

    #[error("line is a comment or header")]
    Comment,

    #[error("invalid metric name: {name}")]
    InvalidName { name: String },

    #[error("malformed label set: {message}")]
    InvalidLabels { message: String },

    #[error("sample has no value")]
    MissingValue,

    #[error("invalid sample value: {value}")]
    InvalidValue { value: String },

    #[error("invalid sample timestamp: {timestamp}")]
    InvalidTimestamp { timestamp: String },

    #[error("unexpected trailing input: {rest}")]
    TrailingInput { rest: String },
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Metric type, `Untyped` unless a `# TYPE` header said otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    #[default]
    Untyped,
}

/// One sample of a family.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    pub timestamp_ms: Option<i64>,
}

impl Sample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub metric_type: MetricType,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    /// Label of the first sample carrying it.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.samples.iter().find_map(|sample| sample.label(name))
    }

    /// Value of the first sample.
    pub fn value(&self) -> Option<f64> {
        self.samples.first().map(|sample| sample.value)
    }
}

/// Parses a single sample line into a family holding that sample.
pub fn parse_metric_line(line: &str) -> Result<MetricFamily> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }
    if line.starts_with('#') {
        return Err(ParseError::Comment);
    }

    let mut cursor = Cursor::new(line);
    let name = cursor.name()?;
    let labels = if cursor.peek() == Some('{') {
        cursor.labels()?
    } else {
        BTreeMap::new()
    };

    let value = cursor.token().ok_or(ParseError::MissingValue)?;
    let value = parse_value(value)?;

    let timestamp_ms = match cursor.token() {
        Some(timestamp) => Some(timestamp.parse::<i64>().map_err(|_| {
            ParseError::InvalidTimestamp {
                timestamp: timestamp.to_string(),
            }
        })?),
        None => None,
    };

    if let Some(rest) = cursor.token() {
        return Err(ParseError::TrailingInput {
            rest: rest.to_string(),
        });
    }

    Ok(MetricFamily {
        name,
        metric_type: MetricType::Untyped,
        samples: vec![Sample {
            labels,
            value,
            timestamp_ms,
        }],
    })
}

/// Extracts the bare value of a single sample line.
pub fn parse_metric_value(line: &str) -> Result<f64> {
    parse_metric_line(line)?
        .value()
        .ok_or(ParseError::MissingValue)
}

fn parse_value(value: &str) -> Result<f64> {
    match value {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        _ => value.parse::<f64>().map_err(|_| ParseError::InvalidValue {
            value: value.to_string(),
        }),
    }
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    /// Metric and label names: `[a-zA-Z_:][a-zA-Z0-9_:]*`.
    fn identifier(&mut self, allow_colon: bool) -> Option<&'a str> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            let valid = c.is_ascii_alphabetic()
                || c == '_'
                || (allow_colon && c == ':')
                || (self.pos > start && c.is_ascii_digit());
            if !valid {
                break;
            }
            self.bump();
        }
        (self.pos > start).then(|| &self.input[start..self.pos])
    }

    fn name(&mut self) -> Result<String> {
        let terminated = |c: Option<char>| c.map_or(true, |c| c == '{' || c.is_whitespace());

        match self.identifier(true) {
            Some(name) if terminated(self.peek()) => Ok(name.to_string()),
            _ => Err(ParseError::InvalidName {
                name: self
                    .input
                    .split(|c: char| c == '{' || c.is_whitespace())
                    .next()
                    .unwrap_or_default()
                    .to_string(),
            }),
        }
    }

    fn labels(&mut self) -> Result<BTreeMap<String, String>> {
        let mut labels = BTreeMap::new();
        self.bump();

        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(labels);
            }

            let key = self
                .identifier(false)
                .ok_or_else(|| invalid_labels("expected label name"))?
                .to_string();
            self.skip_whitespace();
            if self.bump() != Some('=') {
                return Err(invalid_labels(&format!("expected '=' after {key}")));
            }
            self.skip_whitespace();
            let value = self.quoted()?;
            labels.insert(key, value);

            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(labels),
                _ => return Err(invalid_labels("expected ',' or '}'")),
            }
        }
    }

    fn quoted(&mut self) -> Result<String> {
        if self.bump() != Some('"') {
            return Err(invalid_labels("label value must be quoted"));
        }

        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some('n') => value.push('\n'),
                    Some(other) => {
                        return Err(invalid_labels(&format!("unknown escape \\{other}")));
                    }
                    None => return Err(invalid_labels("unterminated label value")),
                },
                Some(c) => value.push(c),
                None => return Err(invalid_labels("unterminated label value")),
            }
        }
    }

    /// Next whitespace separated token.
    fn token(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|c| !c.is_whitespace()) {
            self.bump();
        }
        (self.pos > start).then(|| &self.input[start..self.pos])
    }
}

fn invalid_labels(message: &str) -> ParseError {
    ParseError::InvalidLabels {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn parses_filesystem_sample() {
        let family =
            parse_metric_line(r#"node_filesystem_avail_bytes{mountpoint="/data"} 1073741824"#)
                .unwrap();

        assert_eq!(family.name, "node_filesystem_avail_bytes");
        assert_eq!(family.metric_type, MetricType::Untyped);
        assert_eq!(family.label("mountpoint"), Some("/data"));
        assert_eq!(family.value(), Some(1073741824.0));
    }

    #[test]
    fn parses_multiple_labels_and_timestamp() {
        let family = parse_metric_line(
            r#"node_filesystem_avail_bytes{device="/dev/xvdb",fstype="ext4",mountpoint="/data",} 1.5e+09 1700000000000"#,
        )
        .unwrap();

        let sample = &family.samples[0];
        assert_eq!(sample.label("device"), Some("/dev/xvdb"));
        assert_eq!(sample.label("fstype"), Some("ext4"));
        assert_eq!(sample.value, 1.5e9);
        assert_eq!(sample.timestamp_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn parses_bare_sample() {
        let family = parse_metric_line("up 1").unwrap();

        assert_eq!(family.name, "up");
        assert!(family.samples[0].labels.is_empty());
    }

    #[test]
    fn label_escapes() {
        let family = parse_metric_line(r#"m{path="a\\b",quote="say \"hi\"",nl="x\ny"} 0"#).unwrap();

        assert_eq!(family.label("path"), Some(r"a\b"));
        assert_eq!(family.label("quote"), Some(r#"say "hi""#));
        assert_eq!(family.label("nl"), Some("x\ny"));
    }

    #[test]
    fn special_values() {
        assert!(parse_metric_value("m NaN").unwrap().is_nan());
        assert_eq!(parse_metric_value("m +Inf").unwrap(), f64::INFINITY);
        assert_eq!(parse_metric_value("m -Inf").unwrap(), f64::NEG_INFINITY);
        assert_eq!(parse_metric_value("m -12").unwrap(), -12.0);
    }

    #[test]
    fn comments_and_headers_are_rejected() {
        assert_eq!(parse_metric_line(""), Err(ParseError::Empty));
        assert_eq!(
            parse_metric_line("# HELP node_filesystem_avail_bytes Filesystem space"),
            Err(ParseError::Comment)
        );
        assert_eq!(
            parse_metric_line("# TYPE node_filesystem_avail_bytes gauge"),
            Err(ParseError::Comment)
        );
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert_eq!(parse_metric_line("m"), Err(ParseError::MissingValue));
        assert!(matches!(
            parse_metric_line("m{a=\"b\" 1"),
            Err(ParseError::InvalidLabels { .. })
        ));
        assert!(matches!(
            parse_metric_line("m{a=b} 1"),
            Err(ParseError::InvalidLabels { .. })
        ));
        assert!(matches!(
            parse_metric_line("m abc"),
            Err(ParseError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_metric_line("m 1 2 3"),
            Err(ParseError::TrailingInput { .. })
        ));
        assert!(matches!(
            parse_metric_line("9m 1"),
            Err(ParseError::InvalidName { .. })
        ));
    }
}
