use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;

use crate::models::{ImagePayload, NutritionAnalysis};

/// Reply fragments of one chat turn, in arrival order. Finite and forward-only.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis request failed: {0}")]
    Request(#[from] anyhow::Error),
    #[error("no response from AI")]
    EmptyResponse,
    #[error("analysis response does not match schema: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("a reply is still streaming")]
    Busy,
    #[error("message is empty")]
    EmptyMessage,
    #[error("chat is not available without an image")]
    Unavailable,
    #[error("chat request failed: {0}")]
    Request(#[from] anyhow::Error),
}

/// Single-shot structured nutrition estimate for one image.
#[async_trait::async_trait]
pub trait NutritionAnalyzer: Send + Sync {
    async fn analyze(&self, image: &ImagePayload) -> Result<NutritionAnalysis, AnalysisError>;
}

/// Opens conversational sessions seeded with an image.
pub trait ChatProvider: Send + Sync {
    fn start_chat(&self, image: &ImagePayload) -> Arc<dyn ChatSession>;
}

/// A stateful conversation scoped to one image. At most one send per
/// session is outstanding at a time; callers enforce that.
#[async_trait::async_trait]
pub trait ChatSession: Send + Sync {
    async fn send(&self, message: &str) -> Result<FragmentStream, ChatError>;
}
