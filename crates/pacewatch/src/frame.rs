//! Probe line parsing.

use crate::schema::ProbeSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One presented frame as reported by the probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    pub process_name: String,
    pub pid: u32,
    /// Probe clock in seconds; capture-relative once a session is sealed.
    pub timestamp_seconds: f64,
    pub frame_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_chain: Option<String>,
}

/// Why a line was skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("expected {expected} fields, found {found}")]
    FieldCountMismatch { expected: usize, found: usize },

    #[error("probe reported an unattributed frame")]
    ErrorSentinel,

    #[error("field {field} is not a number: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

fn number<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ParseError> {
    raw.trim().parse().map_err(|_| ParseError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

/// Column `index`, or `InvalidField` when the schema points past the line.
fn column<'a>(fields: &[&'a str], field: &'static str, index: usize) -> Result<&'a str, ParseError> {
    fields.get(index).copied().ok_or_else(|| ParseError::InvalidField {
        field,
        value: format!("<no column {}>", index),
    })
}

/// Turn one probe line into a sample using the negotiated column layout.
pub fn parse(line: &str, schema: &ProbeSchema) -> Result<FrameSample, ParseError> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(schema.delimiter).collect();
    if fields.len() != schema.field_count {
        return Err(ParseError::FieldCountMismatch {
            expected: schema.field_count,
            found: fields.len(),
        });
    }

    let cols = &schema.columns;
    let application = column(&fields, "application", cols.application)?;
    if application == schema.error_token {
        return Err(ParseError::ErrorSentinel);
    }

    let process_name = application
        .strip_suffix(schema.process_suffix.as_str())
        .unwrap_or(application)
        .to_string();
    let pid = number("pid", column(&fields, "pid", cols.process_id)?)?;
    let elapsed: f64 = number("elapsed", column(&fields, "elapsed", cols.elapsed)?)?;
    let frame_time_ms = number("frame_time", column(&fields, "frame_time", cols.frame_time)?)?;
    let swap_chain = match cols.swap_chain {
        Some(i) => Some(column(&fields, "swap_chain", i)?.trim()),
        None => None,
    }
    .filter(|s| !s.is_empty())
    .map(str::to_string);

    Ok(FrameSample {
        process_name,
        pid,
        timestamp_seconds: elapsed * schema.elapsed_scale,
        frame_time_ms,
        swap_chain,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A 31-column PresentMon line.
    pub(crate) fn presentmon_line(app: &str, pid: u32, elapsed_ms: f64, frame_time_ms: f64) -> String {
        let mut fields = vec!["0".to_string(); 31];
        fields[0] = app.to_string();
        fields[1] = pid.to_string();
        fields[2] = "0x00000200A1B2C3D0".to_string();
        fields[10] = frame_time_ms.to_string();
        fields[15] = elapsed_ms.to_string();
        fields.join(",")
    }

    #[test]
    fn test_parse_valid_line() {
        let schema = ProbeSchema::presentmon(false);
        let sample = parse(&presentmon_line("game.exe", 4242, 1500.0, 16.7), &schema).unwrap();
        assert_eq!(sample.process_name, "game");
        assert_eq!(sample.pid, 4242);
        assert!((sample.timestamp_seconds - 1.5).abs() < 1e-9);
        assert_eq!(sample.frame_time_ms, 16.7);
        assert_eq!(sample.swap_chain.as_deref(), Some("0x00000200A1B2C3D0"));
    }

    #[test]
    fn test_field_count_mismatch() {
        let schema = ProbeSchema::presentmon(true);
        let err = parse(&presentmon_line("game.exe", 1, 0.0, 16.0), &schema).unwrap_err();
        assert_eq!(err, ParseError::FieldCountMismatch { expected: 32, found: 31 });
    }

    #[test]
    fn test_error_sentinel() {
        let schema = ProbeSchema::presentmon(false);
        let err = parse(&presentmon_line("<error>", 0, 0.0, 0.0), &schema).unwrap_err();
        assert_eq!(err, ParseError::ErrorSentinel);
    }

    #[test]
    fn test_non_numeric_frame_time() {
        let schema = ProbeSchema::presentmon(false);
        let mut fields: Vec<String> = presentmon_line("game.exe", 1, 0.0, 1.0)
            .split(',')
            .map(str::to_string)
            .collect();
        fields[10] = "NA".to_string();
        let err = parse(&fields.join(","), &schema).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidField { field: "frame_time", value: "NA".to_string() }
        );
    }

    #[test]
    fn test_name_without_suffix_kept() {
        let schema = ProbeSchema::presentmon(false);
        let sample = parse(&presentmon_line("dwm", 7, 10.0, 8.0), &schema).unwrap();
        assert_eq!(sample.process_name, "dwm");
    }

    #[test]
    fn test_trailing_newline_tolerated() {
        let schema = ProbeSchema::presentmon(false);
        let line = format!("{}\r\n", presentmon_line("game.exe", 1, 0.0, 5.0));
        assert!(parse(&line, &schema).is_ok());
    }

    #[test]
    fn test_hand_built_schema_past_line_end() {
        let mut schema = ProbeSchema::presentmon(false);
        schema.columns.elapsed = 40;
        let err = parse(&presentmon_line("game.exe", 1, 0.0, 5.0), &schema).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidField { field: "elapsed", value: "<no column 40>".to_string() }
        );

        schema.columns.elapsed = 15;
        schema.columns.swap_chain = Some(99);
        assert!(matches!(
            parse(&presentmon_line("game.exe", 1, 0.0, 5.0), &schema),
            Err(ParseError::InvalidField { field: "swap_chain", .. })
        ));
    }
}
