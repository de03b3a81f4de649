pub mod extractors;
pub mod writer;

pub use extractors::{GenerativeExtractor, VisionExtractor};
pub use writer::ReceiptWriter;
