// Adapters layer: HTTP clients for the external OCR and generative services.

pub mod gemini;
pub mod google_vision;

pub use gemini::GeminiClient;
pub use google_vision::GoogleVisionClient;
