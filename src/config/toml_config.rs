use crate::app::writer::SUPPORTED_FORMATS;
use crate::config::{
    resolve_api_key, DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL, DEFAULT_VISION_ENDPOINT,
    LOG_FORMATS,
};
use crate::core::ConfigProvider;
use crate::domain::ports::{EngineSettings, GenerativeSettings, VisionSettings};
use crate::utils::error::{ReceiptError, Result};
use crate::utils::validation::{
    validate_choices, validate_non_empty_string, validate_path, validate_positive_number,
    validate_range, validate_url, Validate,
};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern must compile")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub generative: GenerativeConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    pub output: OutputConfig,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_vision_endpoint")]
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerativeConfig {
    #[serde(default = "default_gemini_endpoint")]
    pub endpoint: String,
    pub api_key: Option<String>,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub currency: Option<String>,
    /// 信心分數低於此值時請模型複核
    pub verify_below: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub output_path: String,
    #[serde(default = "default_output_formats")]
    pub output_formats: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_format: Option<String>,
}

fn default_vision_endpoint() -> String {
    DEFAULT_VISION_ENDPOINT.to_string()
}

fn default_gemini_endpoint() -> String {
    DEFAULT_GEMINI_ENDPOINT.to_string()
}

fn default_gemini_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_output_formats() -> Vec<String> {
    vec!["json".to_string()]
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_vision_endpoint(),
            api_key: None,
            timeout_seconds: None,
        }
    }
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_gemini_endpoint(),
            api_key: None,
            model: default_gemini_model(),
            timeout_seconds: None,
        }
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| ReceiptError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${GEMINI_API_KEY})；未設定的保留原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_PLACEHOLDER
            .replace_all(content, |caps: &Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_url("vision.endpoint", &self.vision.endpoint)?;
        validate_url("generative.endpoint", &self.generative.endpoint)?;
        validate_non_empty_string("generative.model", &self.generative.model)?;

        if let Some(timeout) = self.vision.timeout_seconds {
            validate_positive_number("vision.timeout_seconds", timeout, 1)?;
        }
        if let Some(timeout) = self.generative.timeout_seconds {
            validate_positive_number("generative.timeout_seconds", timeout, 1)?;
        }

        if let Some(currency) = &self.extraction.currency {
            validate_non_empty_string("extraction.currency", currency)?;
        }
        if let Some(threshold) = self.extraction.verify_below {
            validate_range("extraction.verify_below", threshold, 0.0, 100.0)?;
        }

        validate_path("output.output_path", &self.output.output_path)?;
        validate_choices(
            "output.output_formats",
            &self.output.output_formats,
            SUPPORTED_FORMATS,
        )?;

        if let Some(format) = self.monitoring.as_ref().and_then(|m| m.log_format.clone()) {
            validate_choices("monitoring.log_format", &[format], LOG_FORMATS)?;
        }

        Ok(())
    }

    /// 取得監控設定
    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn log_format(&self) -> &str {
        self.monitoring
            .as_ref()
            .and_then(|m| m.log_format.as_deref())
            .unwrap_or("compact")
    }
}

impl ConfigProvider for TomlConfig {
    fn vision_settings(&self) -> VisionSettings {
        VisionSettings {
            endpoint: self.vision.endpoint.clone(),
            api_key: resolve_api_key(self.vision.api_key.as_deref()),
            timeout: Duration::from_secs(self.vision.timeout_seconds.unwrap_or(20)),
        }
    }

    fn generative_settings(&self) -> GenerativeSettings {
        GenerativeSettings {
            endpoint: self.generative.endpoint.clone(),
            api_key: resolve_api_key(self.generative.api_key.as_deref()),
            model: self.generative.model.clone(),
            timeout: Duration::from_secs(self.generative.timeout_seconds.unwrap_or(30)),
        }
    }

    fn engine_settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            currency: self
                .extraction
                .currency
                .clone()
                .unwrap_or(defaults.currency),
            verify_below: self.extraction.verify_below.unwrap_or(defaults.verify_below),
            vision_timeout: self.vision_settings().timeout,
            generative_timeout: self.generative_settings().timeout,
        }
    }

    fn output_path(&self) -> &str {
        &self.output.output_path
    }

    fn output_formats(&self) -> Vec<String> {
        self.output.output_formats.clone()
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_toml_config() {
        let toml_content = r#"
[vision]
endpoint = "https://vision.example.com/v1"
api_key = "vision-key"
timeout_seconds = 10

[generative]
api_key = "gemini-key"
model = "gemini-1.5-pro"

[extraction]
currency = "USD"
verify_below = 70.0

[output]
output_path = "./test-output"
output_formats = ["json", "csv"]

[monitoring]
enabled = true
log_format = "json"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        config.validate().unwrap();

        let vision = config.vision_settings();
        assert_eq!(vision.endpoint, "https://vision.example.com/v1");
        assert_eq!(vision.api_key.as_deref(), Some("vision-key"));
        assert_eq!(vision.timeout, Duration::from_secs(10));

        let generative = config.generative_settings();
        assert_eq!(generative.endpoint, DEFAULT_GEMINI_ENDPOINT);
        assert_eq!(generative.model, "gemini-1.5-pro");
        assert_eq!(generative.timeout, Duration::from_secs(30));

        let engine = config.engine_settings();
        assert_eq!(engine.currency, "USD");
        assert_eq!(engine.verify_below, 70.0);
        assert_eq!(engine.vision_timeout, Duration::from_secs(10));

        assert_eq!(config.output_formats(), vec!["json", "csv"]);
        assert!(config.monitoring_enabled());
        assert_eq!(config.log_format(), "json");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = TomlConfig::from_toml_str("[output]\noutput_path = \"./out\"\n").unwrap();
        config.validate().unwrap();

        assert_eq!(config.vision.endpoint, DEFAULT_VISION_ENDPOINT);
        assert_eq!(config.vision_settings().api_key, None);
        assert_eq!(config.engine_settings().currency, "COP");
        assert_eq!(config.engine_settings().verify_below, 80.0);
        assert_eq!(config.output_formats(), vec!["json"]);
        assert!(!config.monitoring_enabled());
        assert_eq!(config.log_format(), "compact");
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("RECEIPT_RECON_TEST_GEMINI_KEY", "from-env");

        let toml_content = r#"
[generative]
api_key = "${RECEIPT_RECON_TEST_GEMINI_KEY}"

[vision]
api_key = "${RECEIPT_RECON_TEST_UNSET_KEY}"

[output]
output_path = "./output"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(
            config.generative_settings().api_key.as_deref(),
            Some("from-env")
        );
        // 未設定的變數不算金鑰
        assert_eq!(config.vision_settings().api_key, None);

        std::env::remove_var("RECEIPT_RECON_TEST_GEMINI_KEY");
    }

    #[test]
    fn test_config_validation() {
        let invalid_endpoint = r#"
[vision]
endpoint = "invalid-url"

[output]
output_path = "./output"
"#;
        let config = TomlConfig::from_toml_str(invalid_endpoint).unwrap();
        assert!(config.validate().is_err());

        let invalid_format = r#"
[output]
output_path = "./output"
output_formats = ["zip"]
"#;
        let config = TomlConfig::from_toml_str(invalid_format).unwrap();
        assert!(config.validate().is_err());

        let invalid_threshold = r#"
[extraction]
verify_below = 140.0

[output]
output_path = "./output"
"#;
        let config = TomlConfig::from_toml_str(invalid_threshold).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_output_section_is_parse_error() {
        let err = TomlConfig::from_toml_str("[vision]\napi_key = \"k\"\n").unwrap_err();
        assert!(matches!(err, ReceiptError::ConfigValidationError { .. }));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[output]\noutput_path = \"./from-file\"\noutput_formats = [\"csv\"]\n")
            .unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.output_path(), "./from-file");
    }
}
