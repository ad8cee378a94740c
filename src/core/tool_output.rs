//! Parser for the line-oriented `key: value` reports printed by the
//! compilation tool and the sandbox.

use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("malformed report line `{line}`")]
    MalformedLine { line: String },
    #[error("missing key `{key}`")]
    MissingKey { key: String },
    #[error("invalid value `{value}` for key `{key}`")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolReport {
    fields: HashMap<String, String>,
}

impl ToolReport {
    /// Blank lines are skipped, a repeated key keeps its last value.
    pub fn parse(stdout: &str) -> Result<Self, ReportError> {
        let mut fields = HashMap::new();

        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                return Err(ReportError::MalformedLine {
                    line: line.to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(ReportError::MalformedLine {
                    line: line.to_string(),
                });
            }

            fields.insert(key.to_string(), value.trim().to_string());
        }

        Ok(Self { fields })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, ReportError> {
        self.get(key).ok_or_else(|| ReportError::MissingKey {
            key: key.to_string(),
        })
    }

    pub fn require_parsed<T: FromStr>(&self, key: &str) -> Result<T, ReportError> {
        let value = self.require(key)?;
        parse_value(key, value)
    }

    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, ReportError> {
        self.get(key).map(|value| parse_value(key, value)).transpose()
    }

    /// Reads a non-negative measurement. Trailing units (`12 ms`) and
    /// fractional values (`12.6`) are accepted, fractions are rounded.
    pub fn require_measurement(&self, key: &str) -> Result<u64, ReportError> {
        let value = self.require(key)?;
        let invalid = || ReportError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        let number = value.split_whitespace().next().ok_or_else(invalid)?;
        if let Ok(parsed) = number.parse::<u64>() {
            return Ok(parsed);
        }
        match number.parse::<f64>() {
            Ok(parsed) if parsed.is_finite() && parsed >= 0.0 => Ok(parsed.round() as u64),
            _ => Err(invalid()),
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ReportError> {
    value.parse().map_err(|_| ReportError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
