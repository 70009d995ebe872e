use std::sync::Arc;

use crate::handlers::chat::{ChatAssistant, TurnOutcome};
use crate::models::{ImagePayload, NutritionAnalysis};
use crate::services::{AnalysisError, ChatError, ChatProvider, NutritionAnalyzer};

pub const ANALYSIS_FAILED_MESSAGE: &str = "分析图片失败。请确保 API 密钥有效且图片清晰。";

/// Where the user is in the photo → estimate cycle. Payloads live only on
/// the variants that need them: a result always has its image and analysis,
/// an error never has an analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    Idle,
    Analyzing {
        image: ImagePayload,
    },
    Result {
        image: ImagePayload,
        analysis: NutritionAnalysis,
    },
    Error {
        image: ImagePayload,
        message: String,
    },
}

impl AppState {
    pub fn name(&self) -> &'static str {
        match self {
            AppState::Idle => "idle",
            AppState::Analyzing { .. } => "analyzing",
            AppState::Result { .. } => "result",
            AppState::Error { .. } => "error",
        }
    }

    pub fn image(&self) -> Option<&ImagePayload> {
        match self {
            AppState::Idle => None,
            AppState::Analyzing { image }
            | AppState::Result { image, .. }
            | AppState::Error { image, .. } => Some(image),
        }
    }

    pub fn analysis(&self) -> Option<&NutritionAnalysis> {
        match self {
            AppState::Result { analysis, .. } => Some(analysis),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            AppState::Error { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Identifies the image selection an analysis outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisTicket {
    generation: u64,
}

pub struct AppController {
    analyzer: Arc<dyn NutritionAnalyzer>,
    chat_provider: Arc<dyn ChatProvider>,
    state: AppState,
    generation: u64,
    chat: Option<ChatAssistant>,
}

impl AppController {
    pub fn new(analyzer: Arc<dyn NutritionAnalyzer>, chat_provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            analyzer,
            chat_provider,
            state: AppState::Idle,
            generation: 0,
            chat: None,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn analyzer(&self) -> Arc<dyn NutritionAnalyzer> {
        self.analyzer.clone()
    }

    /// New image selected: allowed from every state. Clears the previous
    /// analysis/error and replaces the chat session with one for this image.
    pub fn begin_analysis(&mut self, image: ImagePayload) -> AnalysisTicket {
        self.generation += 1;
        log::info!(
            "📸 Image selected (generation {}, was {})",
            self.generation,
            self.state.name()
        );

        let session = self.chat_provider.start_chat(&image);
        self.chat = Some(ChatAssistant::new(self.generation, session));
        self.state = AppState::Analyzing { image };

        AnalysisTicket {
            generation: self.generation,
        }
    }

    /// Apply an analysis outcome. Returns false when the outcome was
    /// superseded by a newer image selection and therefore dropped.
    pub fn finish_analysis(
        &mut self,
        ticket: AnalysisTicket,
        outcome: Result<NutritionAnalysis, AnalysisError>,
    ) -> bool {
        let image = match &self.state {
            AppState::Analyzing { image } if ticket.generation == self.generation => image.clone(),
            _ => {
                log::warn!(
                    "⚠️ Dropping stale analysis outcome (generation {}, current {})",
                    ticket.generation,
                    self.generation
                );
                return false;
            }
        };

        self.state = match outcome {
            Ok(analysis) => {
                log::info!("✅ Analysis ready: {} kcal", analysis.total_calories);
                AppState::Result { image, analysis }
            }
            Err(e) => {
                log::error!("❌ Analysis failed: {}", e);
                AppState::Error {
                    image,
                    message: ANALYSIS_FAILED_MESSAGE.to_string(),
                }
            }
        };
        true
    }

    /// Select an image and run the analysis to completion.
    pub async fn analyze(&mut self, image: ImagePayload) -> &AppState {
        let ticket = self.begin_analysis(image.clone());
        let analyzer = self.analyzer.clone();

        let outcome = analyzer.analyze(&image).await;
        self.finish_analysis(ticket, outcome);

        &self.state
    }

    /// Error → Idle. Returns false in any other state.
    pub fn retry(&mut self) -> bool {
        if !matches!(self.state, AppState::Error { .. }) {
            return false;
        }

        log::info!("🔄 Retry requested, back to idle");
        self.state = AppState::Idle;
        self.chat = None;
        true
    }

    /// Chat needs a subject image and a state that is not an error.
    pub fn chat_available(&self) -> bool {
        self.chat.is_some() && matches!(self.state, AppState::Analyzing { .. } | AppState::Result { .. })
    }

    pub fn chat(&self) -> Option<&ChatAssistant> {
        if self.chat_available() {
            self.chat.as_ref()
        } else {
            None
        }
    }

    pub fn chat_mut(&mut self) -> Option<&mut ChatAssistant> {
        if self.chat_available() {
            self.chat.as_mut()
        } else {
            None
        }
    }

    /// The assistant for `generation`, if it has not been replaced since.
    pub fn chat_for(&mut self, generation: u64) -> Option<&mut ChatAssistant> {
        self.chat.as_mut().filter(|c| c.generation() == generation)
    }

    pub async fn send_chat<F>(&mut self, text: &str, on_fragment: F) -> Result<TurnOutcome, ChatError>
    where
        F: FnMut(&str),
    {
        let chat = self.chat_mut().ok_or(ChatError::Unavailable)?;
        chat.send(text, on_fragment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::chat::GREETING;
    use crate::services::mock::{MockAnalyzer, MockChatProvider, MockTurn};

    const MEAL_JSON: &str = r#"{"totalCalories": 450, "items": [
        {"name": "烤鸡胸肉", "calories": 300, "confidence": 0.9},
        {"name": "西兰花", "calories": 150, "confidence": 0.8}],
        "summary": "高蛋白低脂的一餐。",
        "macroEstimate": {"protein": "35g", "carbs": "20g", "fat": "10g"}}"#;

    fn image(data: &str) -> ImagePayload {
        ImagePayload {
            mime_type: "image/jpeg".to_string(),
            data: data.to_string(),
        }
    }

    fn controller(analyzer: MockAnalyzer, turns: Vec<MockTurn>) -> (AppController, Arc<MockChatProvider>) {
        let provider = Arc::new(MockChatProvider::new(turns));
        (AppController::new(Arc::new(analyzer), provider.clone()), provider)
    }

    #[test]
    fn test_initial_state_is_idle() {
        let (app, _) = controller(MockAnalyzer::failing(), vec![]);

        assert_eq!(app.state(), &AppState::Idle);
        assert!(!app.chat_available());
    }

    #[test]
    fn test_select_image_enters_analyzing() {
        let (mut app, provider) = controller(MockAnalyzer::failing(), vec![]);

        app.begin_analysis(image("QQ=="));

        assert_eq!(app.state().name(), "analyzing");
        assert!(app.state().analysis().is_none());
        assert!(app.state().error_message().is_none());
        assert!(app.chat_available());
        assert_eq!(provider.opened.lock().unwrap().as_slice(), &[image("QQ==")]);
    }

    #[tokio::test]
    async fn test_successful_analysis_reaches_result() {
        let analyzer = Arc::new(MockAnalyzer::returning(MEAL_JSON));
        let mut app = AppController::new(analyzer.clone(), Arc::new(MockChatProvider::new(vec![])));

        let state = app.analyze(image("QQ==")).await;

        let analysis = state.analysis().expect("result state");
        assert_eq!(analysis.total_calories, 450.0);
        assert_eq!(analysis.items.len(), 2);
        assert_eq!(analysis.items[0].name, "烤鸡胸肉");
        assert_eq!(analysis.items[1].name, "西兰花");
        assert_eq!(state.image(), Some(&image("QQ==")));
        assert!(app.chat_available());
        assert_eq!(analyzer.calls.lock().unwrap().as_slice(), &[image("QQ==")]);
    }

    #[tokio::test]
    async fn test_failure_then_retry() {
        let analyzer = Arc::new(MockAnalyzer::failing());
        let mut app = AppController::new(analyzer.clone(), Arc::new(MockChatProvider::new(vec![])));

        app.analyze(image("QQ==")).await;
        assert_eq!(app.state().error_message(), Some(ANALYSIS_FAILED_MESSAGE));
        assert!(app.state().analysis().is_none());
        assert!(!app.chat_available());

        assert!(app.retry());
        assert_eq!(app.state(), &AppState::Idle);
        assert!(app.state().image().is_none());
        assert!(!app.retry());
        assert_eq!(analyzer.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_and_malformed_responses_never_reach_result() {
        for text in ["", "{\"totalCalories\": 450, \"items\": [", "not json"] {
            let (mut app, _) = controller(MockAnalyzer::returning(text), vec![]);
            let state = app.analyze(image("QQ==")).await;
            assert_eq!(state.name(), "error", "response {:?}", text);
        }
    }

    #[tokio::test]
    async fn test_new_image_from_result_or_error_clears_previous() {
        let (mut app, provider) = controller(MockAnalyzer::returning(MEAL_JSON), vec![]);
        app.analyze(image("QQ==")).await;
        assert_eq!(app.state().name(), "result");

        app.begin_analysis(image("Qg=="));
        assert_eq!(app.state(), &AppState::Analyzing { image: image("Qg==") });

        let (mut app, _) = controller(MockAnalyzer::failing(), vec![]);
        app.analyze(image("QQ==")).await;
        app.begin_analysis(image("Qg=="));
        assert!(app.state().error_message().is_none());
        assert_eq!(app.state().name(), "analyzing");

        assert_eq!(provider.opened.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_stale_outcome_is_dropped() {
        let (mut app, _) = controller(MockAnalyzer::failing(), vec![]);

        let first = app.begin_analysis(image("QQ=="));
        let second = app.begin_analysis(image("Qg=="));

        let applied = app.finish_analysis(first, Err(AnalysisError::EmptyResponse));
        assert!(!applied);
        assert_eq!(app.state().name(), "analyzing");

        assert!(app.finish_analysis(second, Err(AnalysisError::EmptyResponse)));
        assert_eq!(app.state().name(), "error");
        assert_eq!(app.state().image(), Some(&image("Qg==")));
    }

    #[tokio::test]
    async fn test_new_image_replaces_chat_session() {
        let (mut app, provider) = controller(
            MockAnalyzer::returning(MEAL_JSON),
            vec![MockTurn::reply(&["不", "含糖。"])],
        );

        app.analyze(image("QQ==")).await;
        app.send_chat("这个含糖吗？", |_| {}).await.unwrap();
        assert_eq!(app.chat().unwrap().transcript().len(), 3);

        app.begin_analysis(image("Qg=="));
        let chat = app.chat().unwrap();
        assert_eq!(chat.transcript().len(), 1);
        assert_eq!(chat.transcript()[0].text, GREETING);
        assert_eq!(chat.generation(), 2);
        assert!(app.chat_for(1).is_none());

        let opened = provider.opened.lock().unwrap();
        assert_eq!(opened.as_slice(), &[image("QQ=="), image("Qg==")]);
    }

    #[tokio::test]
    async fn test_chat_unavailable_without_image() {
        let (mut app, _) = controller(MockAnalyzer::failing(), vec![]);

        let result = app.send_chat("你好", |_| {}).await;
        assert!(matches!(result, Err(ChatError::Unavailable)));

        app.analyze(image("QQ==")).await;
        let result = app.send_chat("你好", |_| {}).await;
        assert!(matches!(result, Err(ChatError::Unavailable)));
    }

    #[tokio::test]
    async fn test_chat_during_analysis() {
        let (mut app, provider) = controller(MockAnalyzer::failing(), vec![MockTurn::reply(&["是的"])]);

        app.begin_analysis(image("QQ=="));
        let outcome = app.send_chat("这是米饭吗？", |_| {}).await.unwrap();

        assert_eq!(outcome, TurnOutcome::Replied);
        assert_eq!(app.chat().unwrap().transcript().last().unwrap().text, "是的");
        assert_eq!(provider.sent.lock().unwrap().as_slice(), &["这是米饭吗？".to_string()]);
    }
}
