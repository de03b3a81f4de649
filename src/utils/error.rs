use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReceiptError {
    #[error("Extractor '{extractor}' unavailable: {reason}")]
    ExtractorUnavailable { extractor: String, reason: String },

    #[error("Extractor '{extractor}' timed out after {seconds}s")]
    ExtractorTimeout { extractor: String, seconds: u64 },

    #[error("Extractor '{extractor}' failed: {message}")]
    ExtractorFailure { extractor: String, message: String },

    #[error("Could not parse '{input}': {reason}")]
    ParseFailure { input: String, reason: String },

    #[error("Extraction failed: vision ({vision}), generative ({generative})")]
    ExtractionFailed { vision: String, generative: String },

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Extractor,
    Parsing,
    Network,
    Storage,
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ReceiptError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ExtractorUnavailable { .. }
            | Self::ExtractorTimeout { .. }
            | Self::ExtractorFailure { .. }
            | Self::ExtractionFailed { .. } => ErrorCategory::Extractor,
            Self::ParseFailure { .. } | Self::SerializationError(_) | Self::CsvError(_) => {
                ErrorCategory::Parsing
            }
            Self::ApiError(_) => ErrorCategory::Network,
            Self::IoError(_) => ErrorCategory::Storage,
            Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ParseFailure { .. } => ErrorSeverity::Low,
            Self::ExtractorTimeout { .. } | Self::ApiError(_) => ErrorSeverity::Medium,
            Self::ExtractorFailure { .. }
            | Self::ExtractionFailed { .. }
            | Self::SerializationError(_)
            | Self::CsvError(_) => ErrorSeverity::High,
            Self::ExtractorUnavailable { .. }
            | Self::IoError(_)
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorSeverity::Critical,
        }
    }

    /// 只影響單一萃取來源的錯誤，由仲裁吸收
    pub fn is_side_failure(&self) -> bool {
        matches!(
            self,
            Self::ExtractorTimeout { .. }
                | Self::ExtractorFailure { .. }
                | Self::ParseFailure { .. }
                | Self::SerializationError(_)
                | Self::ApiError(_)
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::ExtractorUnavailable { .. } => {
                "Configure the API key for the extractor (GOOGLE_VISION_API_KEY / GEMINI_API_KEY)"
            }
            Self::ExtractorTimeout { .. } => "Retry the request or raise timeout_seconds",
            Self::ExtractorFailure { .. } | Self::ApiError(_) => {
                "Check the extractor endpoint and network connectivity"
            }
            Self::ExtractionFailed { .. } => {
                "Retake the photo with the whole receipt in frame and good lighting"
            }
            Self::ParseFailure { .. } | Self::SerializationError(_) | Self::CsvError(_) => {
                "Inspect the raw extractor output with --verbose"
            }
            Self::IoError(_) => "Check file paths and permissions",
            Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => "Fix the configuration file or CLI flags",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::ExtractorUnavailable { extractor, .. } => {
                format!("Service unavailable: {} is not configured", extractor)
            }
            Self::ExtractionFailed { .. } => {
                "Could not read the receipt from either extractor".to_string()
            }
            Self::ExtractorTimeout { extractor, .. } => {
                format!("{} took too long to respond", extractor)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReceiptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_failures_are_absorbable() {
        let timeout = ReceiptError::ExtractorTimeout {
            extractor: "vision".to_string(),
            seconds: 20,
        };
        assert!(timeout.is_side_failure());
        assert_eq!(timeout.category(), ErrorCategory::Extractor);

        let failed = ReceiptError::ExtractionFailed {
            vision: "timeout".to_string(),
            generative: "empty".to_string(),
        };
        assert!(!failed.is_side_failure());
        assert_eq!(failed.severity(), ErrorSeverity::High);
    }

    #[test]
    fn test_unavailable_is_critical_service_error() {
        let err = ReceiptError::ExtractorUnavailable {
            extractor: "gemini".to_string(),
            reason: "GEMINI_API_KEY not set".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(err.user_friendly_message().starts_with("Service unavailable"));
    }

    #[test]
    fn test_config_errors_share_category() {
        let errors = [
            ReceiptError::ConfigValidationError {
                field: "extraction.verify_below".to_string(),
                message: "must be within [0, 100]".to_string(),
            },
            ReceiptError::InvalidConfigValueError {
                field: "log_format".to_string(),
                value: "pretty".to_string(),
                reason: "unknown format".to_string(),
            },
            ReceiptError::MissingConfigError {
                field: "input".to_string(),
            },
        ];
        for err in &errors {
            assert_eq!(err.category(), ErrorCategory::Configuration);
            assert_eq!(err.severity(), ErrorSeverity::Critical);
        }
    }
}
