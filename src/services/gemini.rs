use anyhow::Result;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::ai_service::{AnalysisError, ChatError, ChatProvider, ChatSession, FragmentStream, NutritionAnalyzer};
use super::sse::SseDecoder;
use crate::models::{ImagePayload, NutritionAnalysis};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const ANALYSIS_PROMPT: &str = "请高效分析这张图片。识别所有食物项，估算它们的卡路里，并提供总热量。请根据实际份量进行估算。所有文本内容请使用简体中文返回。";
const ANALYSIS_SYSTEM_INSTRUCTION: &str = "你是一位专业的营养师和饮食专家。你的目标是根据图片提供准确的卡路里估算。请使用简体中文回答。";

const CHAT_SEED_PROMPT: &str = "这是我的餐点图片。我可能会问一些关于具体部分的营养问题。";
const CHAT_SEED_REPLY: &str = "看起来很美味！我已经分析了卡路里。你可以随时问我关于具体配料、健康益处或份量的问题。";
const CHAT_SYSTEM_INSTRUCTION: &str = "你是一位友好、乐于助人的 AI 营养助手。你可以查看用户上传的图片。请用简体中文回答用户关于图片中食物的问题，包括健康益处、潜在过敏原或替代食谱。回答要简洁有用。";

// Fragments buffered between the SSE reader task and the consumer
const FRAGMENT_BUFFER: usize = 32;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

impl Content {
    fn with_role(role: &str, parts: Vec<Part>) -> Self {
        Self {
            role: Some(role.to_string()),
            parts,
        }
    }

    fn instruction(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    fn text(text: &str) -> Self {
        Part::Text { text: text.to_string() }
    }

    fn image(image: &ImagePayload) -> Self {
        Part::InlineData {
            inline_data: InlineData {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// All text parts of the first candidate, concatenated.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Output schema the analysis response is constrained to.
fn analysis_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "totalCalories": {
                "type": "NUMBER",
                "description": "The estimated total calories of the entire meal visible in the image."
            },
            "items": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING", "description": "Name of the food item in Simplified Chinese" },
                        "calories": { "type": "NUMBER", "description": "Estimated calories for this specific item" },
                        "confidence": { "type": "NUMBER", "description": "Confidence score between 0 and 1" }
                    },
                    "required": ["name", "calories", "confidence"]
                },
                "description": "List of identified food items and their calorie counts."
            },
            "summary": {
                "type": "STRING",
                "description": "A brief, encouraging summary of the meal's nutritional value in Simplified Chinese."
            },
            "macroEstimate": {
                "type": "OBJECT",
                "properties": {
                    "protein": { "type": "STRING", "description": "Estimated protein (e.g., '20g')" },
                    "carbs": { "type": "STRING", "description": "Estimated carbs (e.g., '50g')" },
                    "fat": { "type": "STRING", "description": "Estimated fat (e.g., '15g')" }
                },
                "required": ["protein", "carbs", "fat"]
            }
        },
        "required": ["totalCalories", "items", "summary", "macroEstimate"]
    })
}

fn analysis_request(image: &ImagePayload) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content::with_role(
            "user",
            vec![Part::image(image), Part::text(ANALYSIS_PROMPT)],
        )],
        system_instruction: Some(Content::instruction(ANALYSIS_SYSTEM_INSTRUCTION)),
        generation_config: Some(GenerationConfig {
            response_mime_type: "application/json".to_string(),
            response_schema: analysis_schema(),
        }),
    }
}

/// Two seeded turns: the image with a framing message, and a canned acknowledgment.
fn seed_history(image: &ImagePayload) -> Vec<Content> {
    vec![
        Content::with_role("user", vec![Part::image(image), Part::text(CHAT_SEED_PROMPT)]),
        Content::with_role("model", vec![Part::text(CHAT_SEED_REPLY)]),
    ]
}

/// Parse the model's raw text into a validated analysis. All-or-nothing.
pub fn parse_analysis(text: &str) -> Result<NutritionAnalysis, AnalysisError> {
    if text.trim().is_empty() {
        return Err(AnalysisError::EmptyResponse);
    }

    let analysis: NutritionAnalysis =
        serde_json::from_str(text.trim()).map_err(|e| AnalysisError::Parse(e.to_string()))?;
    analysis.validate().map_err(AnalysisError::Parse)?;

    Ok(analysis)
}

/// Text carried by one streamed `GenerateContentResponse` event.
fn parse_stream_event(data: &str) -> Result<String> {
    let chunk: GenerateContentResponse = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        anyhow::bail!("Gemini stream error: {}", error.message);
    }
    Ok(chunk.text())
}

pub struct GeminiService {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiService {
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    fn open_session(&self, image: &ImagePayload) -> GeminiChatSession {
        GeminiChatSession {
            api_key: self.api_key.clone(),
            url: self.api_url("streamGenerateContent"),
            client: self.client.clone(),
            history: Arc::new(Mutex::new(seed_history(image))),
        }
    }

    async fn generate_analysis_text(&self, image: &ImagePayload) -> Result<String> {
        let request = analysis_request(image);

        log::info!("🤖 Sending analysis request to Gemini with model: {}", self.model);
        log::debug!("📤 Request payload size: {} bytes", serde_json::to_string(&request)?.len());

        let response = self
            .client
            .post(self.api_url("generateContent"))
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        log::debug!("📥 Gemini response status: {}", status);

        if !status.is_success() {
            let error_text = response.text().await?;
            log::error!("❌ Gemini API error response: {}", error_text);
            anyhow::bail!("Gemini API error ({}): {}", status, error_text);
        }

        let response_text = response.text().await?;
        log::debug!("📄 Raw Gemini response size: {} bytes", response_text.len());

        let parsed: GenerateContentResponse = serde_json::from_str(&response_text)?;
        if let Some(error) = parsed.error {
            anyhow::bail!("Gemini API error: {}", error.message);
        }

        Ok(parsed.text())
    }
}

#[async_trait::async_trait]
impl NutritionAnalyzer for GeminiService {
    async fn analyze(&self, image: &ImagePayload) -> Result<NutritionAnalysis, AnalysisError> {
        log::debug!("📸 Starting image analysis ({}, {} base64 bytes)", image.mime_type, image.data.len());

        let text = self.generate_analysis_text(image).await?;
        let analysis = parse_analysis(&text)?;

        log::info!(
            "✅ Analysis parsed: {} kcal across {} items",
            analysis.total_calories,
            analysis.items.len()
        );
        Ok(analysis)
    }
}

impl ChatProvider for GeminiService {
    fn start_chat(&self, image: &ImagePayload) -> Arc<dyn ChatSession> {
        log::info!("💬 Opening chat session for {} image", image.mime_type);
        Arc::new(self.open_session(image))
    }
}

/// Chat session backed by `streamGenerateContent`. Completed turns are
/// appended to `history`; a failed turn leaves it untouched.
pub struct GeminiChatSession {
    api_key: String,
    url: String,
    client: reqwest::Client,
    history: Arc<Mutex<Vec<Content>>>,
}

impl GeminiChatSession {
    fn snapshot(&self) -> Result<Vec<Content>> {
        self.history
            .lock()
            .map(|h| h.clone())
            .map_err(|_| anyhow::anyhow!("chat history lock poisoned"))
    }
}

#[async_trait::async_trait]
impl ChatSession for GeminiChatSession {
    async fn send(&self, message: &str) -> Result<FragmentStream, ChatError> {
        let user_turn = Content::with_role("user", vec![Part::text(message)]);

        let mut contents = self.snapshot()?;
        contents.push(user_turn.clone());
        let request = GenerateContentRequest {
            contents,
            system_instruction: Some(Content::instruction(CHAT_SYSTEM_INSTRUCTION)),
            generation_config: None,
        };

        log::info!("💬 Sending chat message ({} chars)", message.chars().count());

        let response = self
            .client
            .post(&self.url)
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            log::error!("❌ Gemini chat error ({}): {}", status, error_text);
            return Err(ChatError::Request(anyhow::anyhow!(
                "Gemini API error ({}): {}",
                status,
                error_text
            )));
        }

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let history = self.history.clone();

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut reply = String::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        log::error!("❌ Chat stream interrupted: {}", e);
                        let _ = tx.send(Err(ChatError::Request(e.into()))).await;
                        return;
                    }
                };

                for event in decoder.push(&chunk) {
                    if !forward_event(&event, &tx, &mut reply).await {
                        return;
                    }
                }
            }

            if let Some(event) = decoder.finish() {
                if !forward_event(&event, &tx, &mut reply).await {
                    return;
                }
            }

            // Gemini rejects history holding an empty text part
            if reply.is_empty() {
                log::warn!("⚠️ Chat stream ended without any text");
                let _ = tx
                    .send(Err(ChatError::Request(anyhow::anyhow!("Gemini reply carried no text"))))
                    .await;
                return;
            }

            log::debug!("✅ Chat reply complete ({} chars)", reply.chars().count());
            if let Ok(mut history) = history.lock() {
                history.push(user_turn);
                history.push(Content::with_role("model", vec![Part::Text { text: reply }]));
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Returns false once the turn must stop: a bad event (already reported
/// to the consumer) or a consumer that went away.
async fn forward_event(
    event: &str,
    tx: &mpsc::Sender<Result<String, ChatError>>,
    reply: &mut String,
) -> bool {
    match parse_stream_event(event) {
        Ok(fragment) => {
            reply.push_str(&fragment);
            tx.send(Ok(fragment)).await.is_ok()
        }
        Err(e) => {
            log::error!("❌ Bad chat stream event: {}", e);
            let _ = tx.send(Err(ChatError::Request(e))).await;
            false
        }
    }
}
