use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AppState;
use crate::error::ApiError;
use crate::query::{update_history, ChatTurn, TurnRole};

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub chat_history: Vec<HistoryTurn>,
}

/// History turn as sent by the client; the role is checked after parsing
#[derive(Debug, Deserialize)]
pub struct HistoryTurn {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub chat_history: Vec<ChatTurn>,
}

/// Keep the turns with a user or ai role, drop the rest
fn known_turns(turns: Vec<HistoryTurn>) -> Vec<ChatTurn> {
    turns
        .into_iter()
        .filter_map(|turn| match TurnRole::parse(&turn.role) {
            Some(role) => Some(ChatTurn {
                role,
                content: turn.content,
            }),
            None => {
                tracing::warn!("Dropping chat history turn with role {:?}", turn.role);
                None
            }
        })
        .collect()
}

pub async fn query(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let question = request.question.unwrap_or_default();
    let mut chat_history = known_turns(request.chat_history);

    let answer = state.engine.handle_query(&question, &chat_history).await?;
    update_history(&mut chat_history, question.trim(), &answer.answer);

    Ok(Json(QueryResponse {
        answer: answer.answer,
        chat_history,
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let documents = state
        .engine
        .store()
        .count()
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "status": "ok",
        "documents": documents
    })))
}
