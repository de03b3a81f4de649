pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
pub mod args;

#[cfg(feature = "cli")]
pub use args::CliConfig;

pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const LOG_FORMATS: &[&str] = &["compact", "json"];

/// 空白或未替換的 `${VAR}` 都視為沒有金鑰
pub fn resolve_api_key(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|key| !key.is_empty() && !key.starts_with("${"))
        .map(str::to_string)
}
