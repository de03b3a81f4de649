pub mod amount;
pub mod arbitration;
pub mod confidence;
pub mod dedup;
pub mod etl;
pub mod fields;
pub mod generative;
pub mod pipeline;
pub mod validator;
pub mod verifier;

pub use crate::domain::model::{ExtractionCandidate, ParsedReceipt, ReceiptFields, ReceiptImage};
pub use crate::domain::ports::{
    ConfigProvider, EngineSettings, GenerativeModel, Pipeline, ReceiptExtractor, Storage,
    TextDetector,
};
pub use crate::utils::error::Result;
