use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How a session treats work items that arrive before capability discovery
/// has finished.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum EarlyWorkPolicy {
    /// Reply with an explicit "not ready" error straight away.
    #[default]
    Reject,
    /// Hold the item until the session is ready, then process it.
    Queue,
}

/// Errors encountered while parsing an [`EarlyWorkPolicy`] from text.
pub type EarlyWorkPolicyParseError = strum::ParseError;

/// Shape of the daemon's log lines.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, fields flattened.
    #[default]
    Json,
    /// Terse text lines for a terminal.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("reject", EarlyWorkPolicy::Reject)]
    #[case("QUEUE", EarlyWorkPolicy::Queue)]
    fn parses_case_insensitively(#[case] input: &str, #[case] expected: EarlyWorkPolicy) {
        let parsed: EarlyWorkPolicy = input.parse().expect("policy should parse");
        assert_eq!(parsed, expected);
    }

    #[rstest]
    fn rejects_unknown_policy() {
        assert!("drop".parse::<EarlyWorkPolicy>().is_err());
    }

    #[rstest]
    #[case("json", LogFormat::Json)]
    #[case("Compact", LogFormat::Compact)]
    fn log_format_parses_case_insensitively(#[case] input: &str, #[case] expected: LogFormat) {
        let parsed: LogFormat = input.parse().expect("format should parse");
        assert_eq!(parsed, expected);
        assert_eq!(expected.to_string(), input.to_ascii_lowercase());
    }
}
