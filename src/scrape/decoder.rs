use std::iter::Peekable;
use std::str::Chars;

use thiserror::Error;

use crate::model::{Label, Labels, Metric, Sample};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Turns a raw scrape payload into (metric, sample) pairs.
///
/// `scraped_at` is the scrape time in Unix milliseconds; formats without
/// per-sample timestamps use it for every sample.
pub trait Decoder: Send + Sync {
    fn decode(&self, payload: &[u8], scraped_at: i64) -> Result<Vec<(Metric, Sample)>, DecodeError>;
}

/// Line-oriented text decoder.
///
/// ```text
/// # comments and blank lines are ignored
/// http_requests_total{method="GET",code="200"} 1027 1700000000000
/// up 1
/// ```
///
/// A single malformed line rejects the whole payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

impl TextDecoder {
    pub fn new() -> Self {
        TextDecoder
    }
}

impl Decoder for TextDecoder {
    fn decode(&self, payload: &[u8], scraped_at: i64) -> Result<Vec<(Metric, Sample)>, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;
        let mut out = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parsed = parse_line(line, scraped_at).map_err(|reason| DecodeError::Malformed {
                line: idx + 1,
                reason,
            })?;
            out.push(parsed);
        }
        Ok(out)
    }
}

fn parse_line(line: &str, default_ts: i64) -> Result<(Metric, Sample), String> {
    let mut chars = line.chars().peekable();

    let name = take_while(&mut chars, |c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
    if name.is_empty() {
        return Err("missing metric name".to_string());
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(format!("metric name {:?} starts with a digit", name));
    }

    let labels = if chars.peek() == Some(&'{') {
        chars.next();
        parse_labels(&mut chars)?
    } else {
        Labels::new()
    };

    let rest: String = chars.collect();
    let mut fields = rest.split_whitespace();
    let value = match fields.next() {
        Some(v) => v
            .parse::<f64>()
            .map_err(|_| format!("invalid sample value {:?}", v))?,
        None => return Err("missing sample value".to_string()),
    };
    let timestamp = match fields.next() {
        Some(ts) => ts
            .parse::<i64>()
            .map_err(|_| format!("invalid timestamp {:?}", ts))?,
        None => default_ts,
    };
    if let Some(extra) = fields.next() {
        return Err(format!("unexpected trailing field {:?}", extra));
    }

    Ok((Metric::new(name, labels), Sample::new(timestamp, value)))
}

fn parse_labels(chars: &mut Peekable<Chars<'_>>) -> Result<Labels, String> {
    let mut pairs = Vec::new();
    loop {
        skip_spaces(chars);
        if chars.peek() == Some(&'}') {
            chars.next();
            break;
        }

        pairs.push(parse_label(chars)?);

        skip_spaces(chars);
        match chars.next() {
            Some(',') => continue,
            Some('}') => break,
            Some(c) => return Err(format!("unexpected {:?} in label set", c)),
            None => return Err("unterminated label set".to_string()),
        }
    }
    Ok(pairs.into_iter().collect())
}

/// Reads one `name="value"` pair.
fn parse_label(chars: &mut Peekable<Chars<'_>>) -> Result<Label, String> {
    let name = take_while(chars, |c| c.is_ascii_alphanumeric() || c == '_');
    if name.is_empty() {
        return Err("missing label name".to_string());
    }
    skip_spaces(chars);
    expect(chars, '=')?;
    skip_spaces(chars);
    expect(chars, '"')?;
    let value = parse_quoted(chars)?;
    Ok(Label::new(name, value))
}

/// Reads a label value up to the closing quote, resolving escapes.
fn parse_quoted(chars: &mut Peekable<Chars<'_>>) -> Result<String, String> {
    let mut value = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(value),
            '\\' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('\\') => value.push('\\'),
                Some('"') => value.push('"'),
                Some(other) => return Err(format!("unknown escape \\{}", other)),
                None => break,
            },
            _ => value.push(c),
        }
    }
    Err("unterminated label value".to_string())
}

fn take_while(chars: &mut Peekable<Chars<'_>>, pred: impl Fn(char) -> bool) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if !pred(c) {
            break;
        }
        out.push(c);
        chars.next();
    }
    out
}

fn skip_spaces(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn expect(chars: &mut Peekable<Chars<'_>>, want: char) -> Result<(), String> {
    match chars.next() {
        Some(c) if c == want => Ok(()),
        Some(c) => Err(format!("expected {:?}, found {:?}", want, c)),
        None => Err(format!("expected {:?}, found end of line", want)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn decode(payload: &str) -> Result<Vec<(Metric, Sample)>, DecodeError> {
        TextDecoder::new().decode(payload.as_bytes(), NOW)
    }

    #[test]
    fn test_decode_plain_and_labelled() {
        let payload = "\
# HELP up whether the target is up
# TYPE up gauge
up 1

http_requests_total{method=\"GET\", code=\"200\"} 1027 1699999999000
";
        let samples = decode(payload).unwrap();
        assert_eq!(samples.len(), 2);

        let (m, s) = &samples[0];
        assert_eq!(m.to_string(), "up{}");
        assert_eq!(*s, Sample::new(NOW, 1.0));

        let (m, s) = &samples[1];
        assert_eq!(m.to_string(), "http_requests_total{code=200,method=GET}");
        assert_eq!(*s, Sample::new(1_699_999_999_000, 1027.0));
    }

    #[test]
    fn test_decode_special_values() {
        let samples = decode("a NaN\nb +Inf\nc -Inf\nd 1.5e3\n").unwrap();
        assert!(samples[0].1.value.is_nan());
        assert_eq!(samples[1].1.value, f64::INFINITY);
        assert_eq!(samples[2].1.value, f64::NEG_INFINITY);
        assert_eq!(samples[3].1.value, 1500.0);
    }

    #[test]
    fn test_decode_label_escapes() {
        let samples = decode(r#"msg{text="say \"hi\"\\n",path="a\\b",trailing="x",} 1"#).unwrap();
        let labels = samples[0].0.labels();
        assert_eq!(labels.get("text"), Some("say \"hi\"\\n"));
        assert_eq!(labels.get("path"), Some("a\\b"));
        assert_eq!(labels.get("trailing"), Some("x"));
    }

    #[test]
    fn test_decode_repeated_label_name_keeps_last() {
        let samples = decode(r#"up{zone="a",host="x",zone="b"} 1"#).unwrap();
        assert_eq!(samples[0].0.to_string(), "up{host=x,zone=b}");
    }

    #[test]
    fn test_decode_empty_payload() {
        assert!(decode("").unwrap().is_empty());
        assert!(decode("# only a comment\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_lines() {
        let cases = [
            ("up", 1),
            ("up one", 1),
            ("up 1 2 3", 1),
            ("up 1 soon", 1),
            ("ok 1\n{a=\"b\"} 1", 2),
            ("9lives 1", 1),
            ("up{job=\"node\" 1", 1),
            ("up{job=node} 1", 1),
            ("up{job=\"node} 1", 1),
        ];
        for (payload, line) in cases {
            match decode(payload) {
                Err(DecodeError::Malformed { line: got, .. }) => {
                    assert_eq!(got, line, "payload {:?}", payload)
                }
                other => panic!("payload {:?} decoded to {:?}", payload, other),
            }
        }
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = TextDecoder::new().decode(&[0xff, 0xfe, b' ', b'1'], NOW).unwrap_err();
        assert_eq!(err, DecodeError::InvalidUtf8);
    }
}
