pub mod ai_service; // Analyzer / chat traits
pub mod gemini; // Google Gemini REST client
pub mod image;
pub mod sse;

#[cfg(test)]
pub mod mock;

pub use ai_service::{AnalysisError, ChatError, ChatProvider, ChatSession, NutritionAnalyzer};
pub use gemini::GeminiService;
