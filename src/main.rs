use anyhow::Context;
use clap::Parser;
use receipt_recon::adapters::{GeminiClient, GoogleVisionClient};
use receipt_recon::app::{GenerativeExtractor, ReceiptWriter, VisionExtractor};
use receipt_recon::config::toml_config::TomlConfig;
use receipt_recon::core::ConfigProvider;
use receipt_recon::utils::error::{ErrorSeverity, ReceiptError, Result};
use receipt_recon::utils::logger::{self, LogFormat};
use receipt_recon::utils::validation::Validate;
use receipt_recon::{CliConfig, LocalStorage, ParsedReceipt, ReceiptEngine, ReceiptPipeline};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();
    let toml = cli.config.as_deref().map(TomlConfig::from_file).transpose();

    // 先決定日誌格式，TOML 設定優先
    let (log_format, monitor_enabled) = match &toml {
        Ok(Some(file)) => (
            file.log_format().to_string(),
            cli.monitor || file.monitoring_enabled(),
        ),
        _ => (cli.log_format.clone(), cli.monitor),
    };
    logger::init_logger(
        log_format.parse().unwrap_or(LogFormat::Compact),
        cli.verbose,
    );

    tracing::info!("Starting receipt-recon CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let toml = toml.unwrap_or_else(|e| exit_with(&e));
    let validated = match &toml {
        Some(file) => file.validate().and_then(|_| cli.image_path().map(|_| ())),
        None => cli.validate(),
    };
    if let Err(e) = validated {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let image_path = cli.image_path().unwrap_or_else(|e| exit_with(&e));
    let result = match &toml {
        Some(file) => run(image_path, file, monitor_enabled).await,
        None => run(image_path, &cli, monitor_enabled).await,
    };

    match result {
        Ok(receipt) => {
            let rendered =
                serde_json::to_string_pretty(&receipt).context("failed to render receipt")?;
            println!("{}", rendered);
            tracing::info!("✅ Receipt processed successfully!");
        }
        Err(e) => exit_with(&e),
    }

    Ok(())
}

async fn run<C: ConfigProvider>(
    image_path: &str,
    config: &C,
    monitor_enabled: bool,
) -> Result<ParsedReceipt> {
    let settings = config.engine_settings();

    let vision_client = GoogleVisionClient::new(config.vision_settings())?;
    let gemini = Arc::new(GeminiClient::new(config.generative_settings())?);
    if !vision_client.is_available() {
        tracing::warn!("⚠️ Google Vision API key not configured");
    }

    let mut vision = VisionExtractor::new(vision_client, settings.clone());
    if gemini.is_available() {
        vision = vision.with_verifier(gemini.clone());
    } else {
        tracing::warn!("⚠️ Gemini API key not configured; verification disabled");
    }
    let generative = GenerativeExtractor::new(gemini, settings.clone());

    let pipeline = ReceiptPipeline::new(vision, generative, settings);
    let engine = ReceiptEngine::new_with_monitoring(pipeline, monitor_enabled);

    let bytes = tokio::fs::read(image_path).await?;
    let receipt = engine.process_bytes(bytes).await?;

    let storage = LocalStorage::new(config.output_path().to_string());
    let writer = ReceiptWriter::new(storage, config.output_formats());
    let written = writer.write(&receipt).await?;
    tracing::info!("📁 Output saved to {}: {:?}", config.output_path(), written);

    Ok(receipt)
}

fn exit_with(e: &ReceiptError) -> ! {
    tracing::error!(
        "❌ Receipt processing failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 4,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code)
}
