use futures::StreamExt;
use std::sync::Arc;

use crate::models::{ChatMessage, ChatRole};
use crate::services::{ChatError, ChatSession};

pub const GREETING: &str = "我已经分析了您的美餐！您可以询问关于食材、更健康的替代方案或详细的营养信息。";
pub const APOLOGY: &str = "抱歉，连接出现问题。请重试。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Replied,
    Failed,
}

/// Transcript and session for one image.
///
/// The transcript is append-only; the only in-place mutation is the last
/// model entry while its reply streams in. A turn is either driven here with
/// [`ChatAssistant::send`], or step by step (`begin_turn`, `open_reply`,
/// `apply_fragment`, `finish_turn`/`fail_turn`) by callers that must not
/// hold the assistant across network waits.
pub struct ChatAssistant {
    generation: u64,
    session: Arc<dyn ChatSession>,
    transcript: Vec<ChatMessage>,
    streaming: bool,
}

impl ChatAssistant {
    pub fn new(generation: u64, session: Arc<dyn ChatSession>) -> Self {
        Self {
            generation,
            session,
            transcript: vec![ChatMessage::new(ChatRole::Model, GREETING)],
            streaming: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Record the user's message and hand back the session to send it on.
    /// Overlapping sends are rejected.
    pub fn begin_turn(&mut self, text: &str) -> Result<Arc<dyn ChatSession>, ChatError> {
        if self.streaming {
            return Err(ChatError::Busy);
        }
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        self.transcript.push(ChatMessage::new(ChatRole::User, text));
        self.streaming = true;
        Ok(self.session.clone())
    }

    /// The reply stream is open: add the model entry fragments will fill.
    pub fn open_reply(&mut self) {
        if self.streaming {
            self.transcript.push(ChatMessage::new(ChatRole::Model, ""));
        }
    }

    pub fn apply_fragment(&mut self, fragment: &str) {
        if !self.streaming {
            return;
        }
        match self.transcript.last_mut() {
            Some(last) if last.role == ChatRole::Model => last.text.push_str(fragment),
            _ => self.transcript.push(ChatMessage::new(ChatRole::Model, fragment)),
        }
    }

    /// Close a turn whose stream ended cleanly. A reply that carried no
    /// text counts as a failure and gets the apology.
    pub fn finish_turn(&mut self) -> TurnOutcome {
        if !self.streaming {
            return TurnOutcome::Replied;
        }
        match self.transcript.last() {
            Some(last) if last.role == ChatRole::Model && last.text.is_empty() => {
                log::warn!("⚠️ Chat reply carried no text");
                self.fail_turn();
                TurnOutcome::Failed
            }
            _ => {
                self.streaming = false;
                TurnOutcome::Replied
            }
        }
    }

    /// Close the turn with the apology. Fragments already shown stay; only
    /// a reply entry that never received text is dropped.
    pub fn fail_turn(&mut self) {
        if !self.streaming {
            return;
        }
        if let Some(last) = self.transcript.last() {
            if last.role == ChatRole::Model && last.text.is_empty() {
                self.transcript.pop();
            }
        }
        self.transcript.push(ChatMessage::new(ChatRole::Model, APOLOGY));
        self.streaming = false;
    }

    /// Run one full turn, calling `on_fragment` as each piece lands.
    /// Only rejections (`Busy`, `EmptyMessage`) are returned as errors;
    /// transport failures end up in the transcript.
    pub async fn send<F>(&mut self, text: &str, mut on_fragment: F) -> Result<TurnOutcome, ChatError>
    where
        F: FnMut(&str),
    {
        let session = self.begin_turn(text)?;

        let mut stream = match session.send(text).await {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("❌ Chat send failed: {}", e);
                self.fail_turn();
                return Ok(TurnOutcome::Failed);
            }
        };

        self.open_reply();
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    self.apply_fragment(&fragment);
                    on_fragment(&fragment);
                }
                Err(e) => {
                    log::error!("❌ Chat stream failed: {}", e);
                    self.fail_turn();
                    return Ok(TurnOutcome::Failed);
                }
            }
        }

        Ok(self.finish_turn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::{MockChatProvider, MockTurn};
    use crate::services::ChatProvider;
    use crate::models::ImagePayload;

    fn assistant(turns: Vec<MockTurn>) -> ChatAssistant {
        assistant_with_provider(turns).0
    }

    fn assistant_with_provider(turns: Vec<MockTurn>) -> (ChatAssistant, MockChatProvider) {
        let provider = MockChatProvider::new(turns);
        let image = ImagePayload {
            mime_type: "image/jpeg".to_string(),
            data: "QQ==".to_string(),
        };
        let chat = ChatAssistant::new(1, provider.start_chat(&image));
        (chat, provider)
    }

    #[tokio::test]
    async fn test_streamed_fragments_concatenate_once() {
        let mut chat = assistant(vec![MockTurn::reply(&["不", "含糖。"])]);
        let mut seen = Vec::new();

        let outcome = chat.send("这个含糖吗？", |f| seen.push(f.to_string())).await.unwrap();

        assert_eq!(outcome, TurnOutcome::Replied);
        assert_eq!(seen, vec!["不", "含糖。"]);

        let transcript = chat.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[0].text, GREETING);
        assert_eq!(transcript[1].role, ChatRole::User);
        assert_eq!(transcript[1].text, "这个含糖吗？");
        assert_eq!(transcript[2].role, ChatRole::Model);
        assert_eq!(transcript[2].text, "不含糖。");
        assert_eq!(transcript.iter().filter(|m| m.text == "不含糖。").count(), 1);
        assert!(!chat.is_streaming());
    }

    #[tokio::test]
    async fn test_zero_length_fragments_tolerated() {
        let mut chat = assistant(vec![MockTurn::reply(&["", "富含", "", "蛋白质"])]);

        chat.send("营养怎么样？", |_| {}).await.unwrap();

        assert_eq!(chat.transcript().last().unwrap().text, "富含蛋白质");
    }

    #[tokio::test]
    async fn test_failure_midway_keeps_fragments_and_apologizes() {
        let mut chat = assistant(vec![MockTurn::fail_after(&["鸡胸肉"]), MockTurn::reply(&["好的"])]);

        let outcome = chat.send("热量高吗？", |_| {}).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Failed);

        let texts: Vec<_> = chat.transcript().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec![GREETING, "热量高吗？", "鸡胸肉", APOLOGY]);

        // further messages are still accepted
        let outcome = chat.send("再说一次", |_| {}).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Replied);
        assert_eq!(chat.transcript().last().unwrap().text, "好的");
    }

    #[tokio::test]
    async fn test_refused_send_adds_single_apology() {
        let mut chat = assistant(vec![MockTurn::Refuse]);

        let outcome = chat.send("有过敏原吗？", |_| {}).await.unwrap();

        assert_eq!(outcome, TurnOutcome::Failed);
        assert_eq!(chat.transcript().len(), 3);
        assert_eq!(chat.transcript()[2].text, APOLOGY);
    }

    #[tokio::test]
    async fn test_empty_reply_is_failed_turn() {
        let mut chat = assistant(vec![MockTurn::reply(&[]), MockTurn::reply(&["", ""]), MockTurn::reply(&["可以"])]);

        assert_eq!(chat.send("能吃吗？", |_| {}).await.unwrap(), TurnOutcome::Failed);
        assert_eq!(chat.send("能吃吗？", |_| {}).await.unwrap(), TurnOutcome::Failed);

        let texts: Vec<_> = chat.transcript().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec![GREETING, "能吃吗？", APOLOGY, "能吃吗？", APOLOGY]);
        assert!(chat.transcript().iter().all(|m| !m.text.is_empty()));

        assert_eq!(chat.send("能吃吗？", |_| {}).await.unwrap(), TurnOutcome::Replied);
        assert_eq!(chat.transcript().last().unwrap().text, "可以");
    }

    #[tokio::test]
    async fn test_user_text_reaches_session() {
        let (mut chat, provider) = assistant_with_provider(vec![MockTurn::reply(&["有"]), MockTurn::Refuse]);

        chat.send("有坚果吗？", |_| {}).await.unwrap();
        chat.send("  有乳制品吗？", |_| {}).await.unwrap();

        let sent = provider.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &["有坚果吗？".to_string(), "  有乳制品吗？".to_string()]);
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let (mut chat, provider) = assistant_with_provider(vec![]);

        let result = chat.send("   ", |_| {}).await;

        assert!(matches!(result, Err(ChatError::EmptyMessage)));
        assert_eq!(chat.transcript().len(), 1);
        assert!(provider.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_overlapping_turn_rejected() {
        let mut chat = assistant(vec![]);

        chat.begin_turn("第一个问题").unwrap();
        chat.open_reply();
        chat.apply_fragment("回答");

        assert!(matches!(chat.begin_turn("第二个问题"), Err(ChatError::Busy)));

        assert_eq!(chat.finish_turn(), TurnOutcome::Replied);
        assert!(chat.begin_turn("第二个问题").is_ok());
        assert_eq!(chat.transcript()[2].text, "回答");
    }
}
