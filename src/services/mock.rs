// Mock implementations used by tests in place of the Gemini service
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::ai_service::{AnalysisError, ChatError, ChatProvider, ChatSession, FragmentStream, NutritionAnalyzer};
use super::gemini::parse_analysis;
use crate::models::{ImagePayload, NutritionAnalysis};

/// Answers every request with the same raw model text, or fails.
pub struct MockAnalyzer {
    response: Option<String>,
    pub calls: Mutex<Vec<ImagePayload>>,
}

impl MockAnalyzer {
    pub fn returning(text: &str) -> Self {
        Self {
            response: Some(text.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl NutritionAnalyzer for MockAnalyzer {
    async fn analyze(&self, image: &ImagePayload) -> Result<NutritionAnalysis, AnalysisError> {
        self.calls.lock().unwrap().push(image.clone());
        match &self.response {
            Some(text) => parse_analysis(text),
            None => Err(AnalysisError::Request(anyhow::anyhow!("network unreachable"))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MockTurn {
    Reply(Vec<String>),
    FailAfter(Vec<String>),
    Refuse,
}

impl MockTurn {
    pub fn reply(fragments: &[&str]) -> Self {
        MockTurn::Reply(fragments.iter().map(|f| f.to_string()).collect())
    }

    pub fn fail_after(fragments: &[&str]) -> Self {
        MockTurn::FailAfter(fragments.iter().map(|f| f.to_string()).collect())
    }
}

/// Every session it opens plays the same script, one turn per send.
/// Messages sent on any of its sessions land in `sent`.
pub struct MockChatProvider {
    turns: Vec<MockTurn>,
    pub opened: Mutex<Vec<ImagePayload>>,
    pub sent: Arc<Mutex<Vec<String>>>,
}

impl MockChatProvider {
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns,
            opened: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ChatProvider for MockChatProvider {
    fn start_chat(&self, image: &ImagePayload) -> Arc<dyn ChatSession> {
        self.opened.lock().unwrap().push(image.clone());
        Arc::new(ScriptedSession {
            turns: Mutex::new(self.turns.iter().cloned().collect()),
            sent: self.sent.clone(),
        })
    }
}

pub struct ScriptedSession {
    turns: Mutex<VecDeque<MockTurn>>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl ChatSession for ScriptedSession {
    async fn send(&self, message: &str) -> Result<FragmentStream, ChatError> {
        self.sent.lock().unwrap().push(message.to_string());

        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockTurn::Reply(Vec::new()));

        match turn {
            MockTurn::Reply(fragments) => Ok(futures::stream::iter(fragments.into_iter().map(Ok::<String, ChatError>)).boxed()),
            MockTurn::FailAfter(fragments) => {
                let items: Vec<Result<String, ChatError>> = fragments
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(ChatError::Request(anyhow::anyhow!("connection reset")))))
                    .collect();
                Ok(futures::stream::iter(items).boxed())
            }
            MockTurn::Refuse => Err(ChatError::Request(anyhow::anyhow!("service unavailable"))),
        }
    }
}
