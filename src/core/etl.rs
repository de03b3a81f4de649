use crate::core::Pipeline;
use crate::domain::model::{ParsedReceipt, PipelineStage, ReceiptImage};
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

/// 驅動單張收據的處理流程並記錄每個階段
pub struct ReceiptEngine<P: Pipeline> {
    pipeline: P,
    monitor: Option<SystemMonitor>,
}

impl<P: Pipeline> ReceiptEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self {
            pipeline,
            monitor: None,
        }
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: monitor_enabled.then(|| SystemMonitor::new(true)),
        }
    }

    /// 從原始位元組建立影像後處理
    pub async fn process_bytes(&self, bytes: Vec<u8>) -> Result<ParsedReceipt> {
        let image = ReceiptImage::from_bytes(bytes)?;
        self.process(&image).await
    }

    pub async fn process(&self, image: &ReceiptImage) -> Result<ParsedReceipt> {
        tracing::info!("🚀 Starting receipt extraction ({})", image.mime_type);
        self.enter(PipelineStage::Extracting);

        let extraction = self.pipeline.extract(image).await?;
        tracing::info!(
            vision_ok = extraction.vision.is_ok(),
            generative_ok = extraction.generative.is_ok(),
            "📥 Extractors finished"
        );

        self.enter(PipelineStage::Reconciling);
        let receipt = match self.pipeline.transform(extraction).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.enter(PipelineStage::Failed);
                tracing::error!("❌ Receipt extraction failed: {}", e);
                return Err(e);
            }
        };

        self.enter(PipelineStage::Done);
        tracing::info!(
            "🎉 Receipt parsed from {}: total {} {}, {} item(s), {:?}",
            receipt.ocr_source,
            receipt.total,
            receipt.currency,
            receipt.items.len(),
            receipt.quality_level
        );

        Ok(receipt)
    }

    fn enter(&self, stage: PipelineStage) {
        tracing::debug!("Stage: {:?}", stage);
        if let Some(monitor) = &self.monitor {
            monitor.log_stats(stage);
        }
    }
}
