use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Output formats accepted by the `log_format` setting.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Human-readable single line events; the default for an interactive tool.
    #[default]
    Compact,
    /// Structured JSON for log shippers.
    Json,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;
