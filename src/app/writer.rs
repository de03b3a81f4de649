use crate::core::{ParsedReceipt, Storage};
use crate::utils::error::{ReceiptError, Result};

pub const JSON_FILE: &str = "receipt.json";
pub const CSV_FILE: &str = "items.csv";
pub const SUPPORTED_FORMATS: &[&str] = &["json", "csv"];

/// 依設定的輸出格式把結果寫入儲存空間
pub struct ReceiptWriter<S: Storage> {
    storage: S,
    formats: Vec<String>,
}

impl<S: Storage> ReceiptWriter<S> {
    pub fn new(storage: S, formats: Vec<String>) -> Self {
        Self { storage, formats }
    }

    /// 回傳實際寫入的檔名
    pub async fn write(&self, receipt: &ParsedReceipt) -> Result<Vec<String>> {
        let mut written = Vec::new();

        for format in &self.formats {
            let (file_name, data) = match format.as_str() {
                "json" => (JSON_FILE, serde_json::to_vec_pretty(receipt)?),
                "csv" => (CSV_FILE, items_csv(receipt)?),
                other => {
                    return Err(ReceiptError::InvalidConfigValueError {
                        field: "output.formats".to_string(),
                        value: other.to_string(),
                        reason: format!("must be one of {:?}", SUPPORTED_FORMATS),
                    })
                }
            };

            tracing::debug!("Writing {} ({} bytes)", file_name, data.len());
            self.storage.write_file(file_name, &data).await?;
            written.push(file_name.to_string());
        }

        tracing::info!("💾 Saved {} output file(s)", written.len());
        Ok(written)
    }
}

pub fn items_csv(receipt: &ParsedReceipt) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["name", "price", "quantity", "duplicates_found"])?;
    for item in &receipt.items {
        writer.write_record([
            item.name.clone(),
            item.unit_price.to_string(),
            item.quantity.to_string(),
            item.duplicates_found.to_string(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| ReceiptError::IoError(e.into_error()))
}
