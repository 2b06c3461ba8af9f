// src/error.rs
//! Error kinds shared by the whole pipeline.
//!
//! Every failure carries an [`ErrorKind`] tag. Only configuration-class kinds
//! (plus final-output and store failures) are allowed to stop a run; the
//! orchestrator turns everything else into a logged, skipped item.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    ServerError,
    MalformedResponse,
    UnknownField,
    UnknownItemType,
    InvalidIssn,
    InvalidDate,
    DateFormatConfig,
    AuthorLookup,
    RecordEdit,
    RecordTooLarge,
    FanoutLimit,
    Configuration,
    ExportConversion,
    StoreIo,
    Unknown,
}

impl ErrorKind {
    /// Kinds that indicate a broken deployment or an unusable output file.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::Configuration | ErrorKind::ExportConversion | ErrorKind::StoreIo
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::ServerError => "server_error",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::UnknownField => "unknown_field",
            ErrorKind::UnknownItemType => "unknown_item_type",
            ErrorKind::InvalidIssn => "invalid_issn",
            ErrorKind::InvalidDate => "invalid_date",
            ErrorKind::DateFormatConfig => "date_format_config",
            ErrorKind::AuthorLookup => "author_lookup",
            ErrorKind::RecordEdit => "record_edit",
            ErrorKind::RecordTooLarge => "record_too_large",
            ErrorKind::FanoutLimit => "fanout_limit",
            ErrorKind::Configuration => "configuration",
            ErrorKind::ExportConversion => "export_conversion",
            ErrorKind::StoreIo => "store_io",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("translation service answered HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unknown key \"{key}\" in record ({value})")]
    UnknownField { key: String, value: String },

    #[error("unknown item type \"{0}\"")]
    UnknownItemType(String),

    #[error("\"{0}\" is not a valid ISSN (multiple ISSN's?)")]
    InvalidIssn(String),

    #[error("can't parse date \"{raw}\": {reason}")]
    InvalidDate { raw: String, reason: String },

    #[error("invalid date format \"{0}\"")]
    DateFormatConfig(String),

    #[error("author lookup for \"{author}\" failed: {reason}")]
    AuthorLookup { author: String, reason: String },

    #[error("editing the new record failed: {0}")]
    RecordEdit(String),

    #[error("record can't be serialised: {0}")]
    RecordTooLarge(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("converting to target format failed: {0}")]
    ExportConversion(String),

    #[error("store failure: {0}")]
    StoreIo(String),
}

impl HarvestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarvestError::Transport(_) => ErrorKind::Transport,
            HarvestError::Server { .. } => ErrorKind::ServerError,
            HarvestError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            HarvestError::UnknownField { .. } => ErrorKind::UnknownField,
            HarvestError::UnknownItemType(_) => ErrorKind::UnknownItemType,
            HarvestError::InvalidIssn(_) => ErrorKind::InvalidIssn,
            HarvestError::InvalidDate { .. } => ErrorKind::InvalidDate,
            HarvestError::DateFormatConfig(_) => ErrorKind::DateFormatConfig,
            HarvestError::AuthorLookup { .. } => ErrorKind::AuthorLookup,
            HarvestError::RecordEdit(_) => ErrorKind::RecordEdit,
            HarvestError::RecordTooLarge(_) => ErrorKind::RecordTooLarge,
            HarvestError::Configuration(_) => ErrorKind::Configuration,
            HarvestError::ExportConversion(_) => ErrorKind::ExportConversion,
            HarvestError::StoreIo(_) => ErrorKind::StoreIo,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }

    pub fn config(msg: impl Into<String>) -> Self {
        HarvestError::Configuration(msg.into())
    }
}

impl From<sled::Error> for HarvestError {
    fn from(e: sled::Error) -> Self {
        HarvestError::StoreIo(e.to_string())
    }
}

impl From<std::io::Error> for HarvestError {
    fn from(e: std::io::Error) -> Self {
        HarvestError::StoreIo(e.to_string())
    }
}

pub type Result<T, E = HarvestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_output_and_store_kinds_are_fatal() {
        assert!(HarvestError::config("bad map").is_fatal());
        assert!(HarvestError::ExportConversion("x".into()).is_fatal());
        assert!(HarvestError::StoreIo("x".into()).is_fatal());

        assert!(!HarvestError::InvalidIssn("1234".into()).is_fatal());
        assert!(!HarvestError::UnknownField {
            key: "foo".into(),
            value: "1".into()
        }
        .is_fatal());
        assert!(!HarvestError::Transport("timeout".into()).is_fatal());
        assert!(!HarvestError::RecordTooLarge("field 520".into()).is_fatal());
    }

    #[test]
    fn unknown_field_message_names_the_key() {
        let e = HarvestError::UnknownField {
            key: "bogus".into(),
            value: "\"x\"".into(),
        };
        assert!(e.to_string().contains("unknown key \"bogus\""));
        assert_eq!(e.kind(), ErrorKind::UnknownField);
    }
}
