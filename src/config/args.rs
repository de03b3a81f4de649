use crate::app::writer::SUPPORTED_FORMATS;
use crate::config::{
    resolve_api_key, DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL, DEFAULT_VISION_ENDPOINT,
    LOG_FORMATS,
};
use crate::core::ConfigProvider;
use crate::domain::ports::{EngineSettings, GenerativeSettings, VisionSettings};
use crate::utils::error::Result;
use crate::utils::validation::{
    validate_choices, validate_non_empty_string, validate_path, validate_positive_number,
    validate_range, validate_required_field, validate_url, Validate,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "receipt-recon")]
#[command(about = "Extract and reconcile totals and line items from a receipt photo")]
pub struct CliConfig {
    #[arg(long, help = "Receipt image to process")]
    pub image: Option<String>,

    #[arg(long, help = "Load settings from a TOML file instead of flags")]
    pub config: Option<String>,

    #[arg(long, default_value = "./output")]
    pub output_path: String,

    #[arg(long, value_delimiter = ',', default_value = "json")]
    pub output_formats: Vec<String>,

    #[arg(long, default_value = DEFAULT_VISION_ENDPOINT)]
    pub vision_endpoint: String,

    #[serde(skip_serializing)]
    #[arg(long, env = "GOOGLE_VISION_API_KEY", hide_env_values = true)]
    pub vision_api_key: Option<String>,

    #[arg(long, default_value_t = 20)]
    pub vision_timeout: u64,

    #[arg(long, default_value = DEFAULT_GEMINI_ENDPOINT)]
    pub gemini_endpoint: String,

    #[serde(skip_serializing)]
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, default_value = DEFAULT_GEMINI_MODEL)]
    pub gemini_model: String,

    #[arg(long, default_value_t = 30)]
    pub generative_timeout: u64,

    #[arg(long, default_value = "COP", help = "Currency when the receipt shows none")]
    pub currency: String,

    #[arg(long, default_value_t = 80.0, help = "Verify vision parses scoring below this")]
    pub verify_below: f64,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log process memory at each stage")]
    pub monitor: bool,

    #[arg(long, default_value = "compact", help = "compact or json")]
    pub log_format: String,
}

impl CliConfig {
    pub fn image_path(&self) -> Result<&str> {
        validate_required_field("image", &self.image).map(String::as_str)
    }
}

impl ConfigProvider for CliConfig {
    fn vision_settings(&self) -> VisionSettings {
        VisionSettings {
            endpoint: self.vision_endpoint.clone(),
            api_key: resolve_api_key(self.vision_api_key.as_deref()),
            timeout: Duration::from_secs(self.vision_timeout),
        }
    }

    fn generative_settings(&self) -> GenerativeSettings {
        GenerativeSettings {
            endpoint: self.gemini_endpoint.clone(),
            api_key: resolve_api_key(self.gemini_api_key.as_deref()),
            model: self.gemini_model.clone(),
            timeout: Duration::from_secs(self.generative_timeout),
        }
    }

    fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            currency: self.currency.clone(),
            verify_below: self.verify_below,
            vision_timeout: Duration::from_secs(self.vision_timeout),
            generative_timeout: Duration::from_secs(self.generative_timeout),
        }
    }

    fn output_path(&self) -> &str {
        &self.output_path
    }

    fn output_formats(&self) -> Vec<String> {
        self.output_formats.clone()
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_path("image", self.image_path()?)?;
        validate_path("output_path", &self.output_path)?;
        validate_choices("output_formats", &self.output_formats, SUPPORTED_FORMATS)?;
        validate_url("vision_endpoint", &self.vision_endpoint)?;
        validate_url("gemini_endpoint", &self.gemini_endpoint)?;
        validate_non_empty_string("gemini_model", &self.gemini_model)?;
        validate_positive_number("vision_timeout", self.vision_timeout, 1)?;
        validate_positive_number("generative_timeout", self.generative_timeout, 1)?;
        validate_non_empty_string("currency", &self.currency)?;
        validate_range("verify_below", self.verify_below, 0.0, 100.0)?;
        validate_choices("log_format", &[self.log_format.clone()], LOG_FORMATS)?;
        Ok(())
    }
}
