use serde::{Deserialize, Serialize};

use crate::handlers::AppController;
use crate::models::{ChatMessage, NutritionAnalysis};

/// JSON snapshot of the controller returned by every state-changing route.
#[derive(Debug, Serialize)]
pub struct StateView {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_mime_type: Option<String>,
    pub analysis: Option<NutritionAnalysis>,
    pub error: Option<String>,
    pub chat_available: bool,
    pub streaming: bool,
    pub transcript: Vec<ChatMessage>,
}

impl StateView {
    pub fn from_controller(app: &AppController) -> Self {
        let state = app.state();
        let chat = app.chat();

        Self {
            state: state.name(),
            image_mime_type: state.image().map(|i| i.mime_type.clone()),
            analysis: state.analysis().cloned(),
            error: state.error_message().map(str::to_string),
            chat_available: chat.is_some(),
            streaming: chat.map(|c| c.is_streaming()).unwrap_or(false),
            transcript: chat.map(|c| c.transcript().to_vec()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

// Axum router over the shared controller
pub mod server {
    use super::*;
    use axum::{
        body::{Body, Bytes},
        extract::{DefaultBodyLimit, State},
        http::{header, HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
        Json, Router,
    };
    use futures::StreamExt;
    use std::convert::Infallible;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex};
    use tokio_stream::wrappers::ReceiverStream;
    use tower_http::limit::RequestBodyLimitLayer;

    use crate::handlers::chat::{ChatAssistant, TurnOutcome, APOLOGY};
    use crate::services::{image, ChatError, ChatSession};

    const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
    const FRAGMENT_BUFFER: usize = 32;

    pub struct WebState {
        pub controller: Mutex<AppController>,
    }

    pub fn create_router(controller: AppController) -> Router {
        let state = Arc::new(WebState {
            controller: Mutex::new(controller),
        });

        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_check))
            .route("/api/state", get(get_state))
            .route("/api/image", post(upload_image))
            .route("/api/retry", post(retry))
            .route("/api/chat", post(send_chat))
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
            .with_state(state)
    }

    async fn get_state(State(state): State<Arc<WebState>>) -> Json<StateView> {
        let app = state.controller.lock().await;
        Json(StateView::from_controller(&app))
    }

    async fn upload_image(
        State(state): State<Arc<WebState>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Json<StateView>, (StatusCode, String)> {
        if body.is_empty() {
            return Err((StatusCode::BAD_REQUEST, "empty image body".to_string()));
        }

        // Browsers may post the FileReader result as-is
        let payload = if body.starts_with(b"data:") {
            let url = std::str::from_utf8(&body)
                .map_err(|_| (StatusCode::BAD_REQUEST, "data URL is not UTF-8".to_string()))?;
            image::from_data_url(url.trim()).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
        } else {
            let mime_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
                .unwrap_or_else(|| "image/jpeg".to_string());

            if !mime_type.starts_with("image/") {
                return Err((
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    format!("expected an image, got {}", mime_type),
                ));
            }
            image::from_bytes(&body, &mime_type)
        };

        log::info!("📸 Image upload: {} ({} base64 bytes)", payload.mime_type, payload.data.len());

        // The lock is not held while the model works
        let (ticket, analyzer) = {
            let mut app = state.controller.lock().await;
            (app.begin_analysis(payload.clone()), app.analyzer())
        };

        let outcome = analyzer.analyze(&payload).await;

        let mut app = state.controller.lock().await;
        app.finish_analysis(ticket, outcome);
        Ok(Json(StateView::from_controller(&app)))
    }

    async fn retry(State(state): State<Arc<WebState>>) -> Result<Json<StateView>, (StatusCode, String)> {
        let mut app = state.controller.lock().await;
        if !app.retry() {
            return Err((StatusCode::CONFLICT, "nothing to retry".to_string()));
        }
        Ok(Json(StateView::from_controller(&app)))
    }

    async fn send_chat(State(state): State<Arc<WebState>>, Json(request): Json<ChatRequest>) -> Response {
        let (generation, session) = {
            let mut app = state.controller.lock().await;
            let Some(chat) = app.chat_mut() else {
                return (StatusCode::CONFLICT, ChatError::Unavailable.to_string()).into_response();
            };

            match chat.begin_turn(&request.message) {
                Ok(session) => (chat.generation(), session),
                Err(e @ ChatError::EmptyMessage) => {
                    return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
                }
                Err(e) => return (StatusCode::CONFLICT, e.to_string()).into_response(),
            }
        };

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        tokio::spawn(stream_reply(state.clone(), generation, session, request.message, tx));

        (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(ReceiverStream::new(rx)),
        )
            .into_response()
    }

    async fn with_chat<F, R>(state: &WebState, generation: u64, f: F) -> Option<R>
    where
        F: FnOnce(&mut ChatAssistant) -> R,
    {
        let mut app = state.controller.lock().await;
        match app.chat_for(generation) {
            Some(chat) => Some(f(chat)),
            None => {
                log::debug!("Chat generation {} was replaced, dropping update", generation);
                None
            }
        }
    }

    /// Drive one turn: every fragment is applied to the transcript first,
    /// then forwarded to the HTTP body. A client that disconnects does not
    /// stop the turn.
    async fn stream_reply(
        state: Arc<WebState>,
        generation: u64,
        session: Arc<dyn ChatSession>,
        message: String,
        tx: mpsc::Sender<Result<String, Infallible>>,
    ) {
        let mut stream = match session.send(&message).await {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("❌ Chat send failed: {}", e);
                with_chat(&state, generation, |chat| chat.fail_turn()).await;
                let _ = tx.send(Ok(APOLOGY.to_string())).await;
                return;
            }
        };

        with_chat(&state, generation, |chat| chat.open_reply()).await;

        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    with_chat(&state, generation, |chat| chat.apply_fragment(&fragment)).await;
                    let _ = tx.send(Ok(fragment)).await;
                }
                Err(e) => {
                    log::error!("❌ Chat stream failed: {}", e);
                    with_chat(&state, generation, |chat| chat.fail_turn()).await;
                    let _ = tx.send(Ok(format!("\n{}", APOLOGY))).await;
                    return;
                }
            }
        }

        if with_chat(&state, generation, |chat| chat.finish_turn()).await == Some(TurnOutcome::Failed) {
            let _ = tx.send(Ok(APOLOGY.to_string())).await;
        }
    }

    async fn root_handler() -> &'static str {
        "NutriScan AI - POST an image to /api/image, then chat via /api/chat"
    }

    async fn health_check() -> &'static str {
        "OK"
    }

}
