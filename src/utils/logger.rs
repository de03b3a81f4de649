use crate::config::LOG_FORMATS;
use crate::utils::error::ReceiptError;
use std::str::FromStr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    /// 服務／容器環境使用，方便集中式日誌收集
    Json,
}

impl FromStr for LogFormat {
    type Err = ReceiptError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ReceiptError::InvalidConfigValueError {
                field: "log_format".to_string(),
                value: other.to_string(),
                reason: format!("must be one of {:?}", LOG_FORMATS),
            }),
        }
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = if verbose {
            "receipt_recon=debug,info"
        } else {
            "receipt_recon=info"
        };
        EnvFilter::new(directive)
    })
}

/// 日誌一律寫到 stderr，stdout 只留給收據 JSON
pub fn init_logger(format: LogFormat, verbose: bool) {
    let layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(env_filter(verbose));

    match format {
        LogFormat::Compact => registry.with(layer.compact()).init(),
        LogFormat::Json => registry.with(layer.json()).init(),
    }
}
