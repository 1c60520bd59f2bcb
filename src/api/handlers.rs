//! HTTP request handlers

use super::types::{
    AnalyticsRangeQuery, ChatRequest, ChatResponseBody, CostQuery, ErrorResponse, FeedbackRequest,
    FeedbackResponse, HealthResponse, MessageItem, PathsQuery, ResolutionPathItem,
    SessionDetailResponse, SessionListItem, SessionListQuery, SessionListResponse,
    ToolExecuteResponse, ToolInfo, UpdateSessionRequest, UpdateSessionResponse,
};
use super::AppState;
use crate::analytics::{CostGranularity, IssueCategory, SessionOutcome};
use crate::runtime::AgentError;
use crate::tools::ToolCall;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        // Sessions
        .route("/api/sessions", get(list_sessions))
        .route(
            "/api/sessions/:id",
            get(get_session_detail)
                .patch(update_session)
                .delete(delete_session),
        )
        .route("/api/sessions/:id/messages", get(get_session_messages))
        .route("/api/sessions/:id/cancel", post(cancel_session))
        // Feedback
        .route("/api/feedback", post(submit_feedback))
        // Analytics
        .route("/api/analytics/summary", get(analytics_summary))
        .route("/api/analytics/tools", get(analytics_tools))
        .route("/api/analytics/quality", get(analytics_quality))
        .route("/api/analytics/paths", get(analytics_paths))
        .route("/api/analytics/cost", get(analytics_cost))
        // Tools
        .route("/api/tools", get(list_tools))
        .route("/api/tools/:name/execute", post(execute_tool))
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// ============================================================
// Chat
// ============================================================

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    match state
        .runtime
        .handle_chat(&request.message, request.conversation_id.as_deref())
        .await
    {
        Ok(outcome) => Json(ChatResponseBody {
            response: outcome.response,
            tool_calls: if outcome.tool_calls.is_empty() {
                None
            } else {
                Some(outcome.tool_calls)
            },
            conversation_id: outcome.session_id.clone(),
            session_id: outcome.session_id,
            diagnostics: outcome.diagnostics,
        })
        .into_response(),
        Err(AgentError::Cancelled) => {
            error_response(StatusCode::CONFLICT, "The request was cancelled")
        }
        Err(AgentError::Llm(e)) => {
            tracing::error!(error = %e, "Chat turn failed");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "I couldn't reach a language model right now. Please check that the local \
                 assistant is running, or try again in a moment.",
            )
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        llm_backends: state.router.availability().await,
        tools_available: state.registry.len(),
    })
}

// ============================================================
// Sessions
// ============================================================

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionListQuery>,
) -> Response {
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);
    let offset = (page - 1) * page_size;

    let outcome = query.outcome.as_deref().and_then(SessionOutcome::parse);
    let category = query
        .category
        .as_deref()
        .map(IssueCategory::parse)
        .filter(|c| *c != IssueCategory::Unknown);

    // One extra row decides has_more without a second count query
    let sessions = match state
        .storage
        .get_sessions(outcome, category, page_size + 1, offset)
    {
        Ok(sessions) => sessions,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let has_more = sessions.len() as i64 > page_size;
    let items: Vec<SessionListItem> = sessions
        .into_iter()
        .take(usize::try_from(page_size).unwrap_or(usize::MAX))
        .map(|session| SessionListItem {
            id: session.session_id.clone(),
            started_at: session.started_at.to_rfc3339(),
            outcome: session.outcome.as_str().to_string(),
            issue_category: (session.issue_category != IssueCategory::Unknown)
                .then(|| session.issue_category.as_str().to_string()),
            preview: session
                .preview
                .clone()
                .unwrap_or_else(|| "New conversation...".to_string()),
            message_count: session.message_count,
        })
        .collect();

    let total = state.storage.count_sessions().unwrap_or(0);

    Json(SessionListResponse {
        items,
        total,
        page,
        page_size,
        has_more,
    })
    .into_response()
}

async fn get_session_detail(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session = match state.storage.get_session(&id) {
        Ok(Some(session)) => session,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Session not found"),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let events = state.storage.get_events(&id).unwrap_or_default();
    let tool_events = state.storage.get_tool_events(&id).unwrap_or_default();
    let feedback = state.storage.get_feedback(&id).ok().flatten();

    Json(SessionDetailResponse {
        session,
        events,
        tool_events,
        feedback,
    })
    .into_response()
}

async fn get_session_messages(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.storage.get_messages(&id) {
        Ok(messages) => {
            let items: Vec<MessageItem> = messages
                .into_iter()
                .filter(|m| m.role != "system")
                .map(|m| MessageItem {
                    id: m.message_id,
                    role: m.role,
                    content: m.content,
                    timestamp: m.timestamp.to_rfc3339(),
                })
                .collect();
            Json(items).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateSessionRequest>,
) -> Response {
    match state.storage.get_session(&id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Session not found"),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }

    let mut preview_updated = None;
    let mut outcome_updated = None;

    if let Some(preview) = &request.preview {
        preview_updated = state.storage.update_session_preview(&id, preview).ok();
    }

    if let Some(outcome_str) = &request.outcome {
        let Some(outcome) = SessionOutcome::parse(outcome_str) else {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid outcome: {outcome_str}"),
            );
        };
        // Terminal outcomes go through the collector so the end time,
        // category, and resolution path are written consistently.
        if outcome.is_terminal() && state.collector.is_active(&id) {
            state.collector.end_session(&id, outcome);
            outcome_updated = Some(true);
        } else {
            outcome_updated = state.storage.update_session_outcome(&id, outcome).ok();
        }
    }

    Json(UpdateSessionResponse {
        success: preview_updated == Some(true) || outcome_updated == Some(true),
        preview_updated,
        outcome_updated,
    })
    .into_response()
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.storage.delete_session(&id) {
        Ok(true) => {
            state.runtime.sessions().remove(&id);
            Json(serde_json::json!({"success": true})).into_response()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Session not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn cancel_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.runtime.cancel_session(&id) {
        Json(serde_json::json!({"success": true})).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "Session not found")
    }
}

// ============================================================
// Feedback
// ============================================================

async fn submit_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Response {
    if !(1..=5).contains(&request.score) {
        return error_response(StatusCode::BAD_REQUEST, "Score must be between 1 and 5");
    }

    match state.storage.get_session(&request.session_id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Session not found"),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }

    let feedback = state.collector.record_feedback(
        &request.session_id,
        request.score,
        request.comment,
        &request.source,
    );

    Json(FeedbackResponse {
        feedback_id: feedback.feedback_id,
        session_id: feedback.session_id,
        score: feedback.score,
    })
    .into_response()
}

// ============================================================
// Analytics
// ============================================================

fn parse_date(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

async fn analytics_summary(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsRangeQuery>,
) -> Response {
    let start = parse_date(query.start.as_deref());
    let end = parse_date(query.end.as_deref());
    match state.storage.get_session_summary(start, end) {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn analytics_tools(State(state): State<AppState>) -> Response {
    match state.storage.get_tool_stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn analytics_quality(State(state): State<AppState>) -> Response {
    match state.storage.get_quality_metrics() {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn analytics_paths(
    State(state): State<AppState>,
    Query(query): Query<PathsQuery>,
) -> Response {
    match state.storage.get_common_resolution_paths(query.limit) {
        Ok(paths) => {
            let items: Vec<ResolutionPathItem> = paths
                .into_iter()
                .map(|(tool_sequence, count)| ResolutionPathItem {
                    tool_sequence,
                    count,
                })
                .collect();
            Json(items).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn analytics_cost(State(state): State<AppState>, Query(query): Query<CostQuery>) -> Response {
    let granularity = match query.granularity.as_str() {
        "day" => CostGranularity::Day,
        "week" => CostGranularity::Week,
        "month" => CostGranularity::Month,
        other => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid granularity: {other}"),
            )
        }
    };
    let start = parse_date(query.start.as_deref());
    let end = parse_date(query.end.as_deref());

    match state.storage.get_cost_by_period(start, end, granularity) {
        Ok(periods) => Json(periods).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================
// Tools
// ============================================================

async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolInfo>> {
    let tools = state
        .registry
        .definitions()
        .iter()
        .map(|def| ToolInfo {
            name: def.name.clone(),
            display_name: def.display_name.clone(),
            description: def.description.clone(),
            category: serde_json::to_value(def.category)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            osi_layer: def.osi_layer,
            parameters: def.parameters.clone(),
        })
        .collect();
    Json(tools)
}

/// Execute a tool directly, outside any session.
async fn execute_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(arguments): Json<Value>,
) -> Response {
    if !state.registry.contains(&name) {
        return error_response(StatusCode::NOT_FOUND, format!("Unknown tool '{name}'"));
    }

    let arguments: Map<String, Value> = arguments.as_object().cloned().unwrap_or_default();
    let call = ToolCall {
        id: Uuid::new_v4().to_string(),
        name: name.clone(),
        arguments,
    };

    let start = std::time::Instant::now();
    let result = state
        .registry
        .execute(&call, None, CancellationToken::new())
        .await;
    let duration = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

    // Parsed object when the tool produced JSON, else the raw string
    let result_value = serde_json::from_str::<Value>(&result.content)
        .unwrap_or(Value::String(result.content.clone()));

    Json(ToolExecuteResponse {
        tool_call_id: result.tool_call_id,
        name: result.name,
        result: result_value,
        error: (!result.success).then(|| result.content),
        duration,
    })
    .into_response()
}

// ============================================================
// WebSocket
// ============================================================

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| ws_chat(socket, state))
}

/// Real-time chat: each JSON frame is a chat request, each reply frame a
/// chat response.
async fn ws_chat(mut socket: WebSocket, state: AppState) {
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };

        let Ok(request) = serde_json::from_str::<ChatRequest>(&text) else {
            let _ = socket
                .send(WsMessage::Text(
                    serde_json::json!({"error": "Invalid request"}).to_string(),
                ))
                .await;
            continue;
        };

        let reply = match state
            .runtime
            .handle_chat(&request.message, request.conversation_id.as_deref())
            .await
        {
            Ok(outcome) => serde_json::to_string(&ChatResponseBody {
                response: outcome.response,
                tool_calls: if outcome.tool_calls.is_empty() {
                    None
                } else {
                    Some(outcome.tool_calls)
                },
                conversation_id: outcome.session_id.clone(),
                session_id: outcome.session_id,
                diagnostics: outcome.diagnostics,
            })
            .unwrap_or_default(),
            Err(e) => serde_json::json!({"error": e.to_string()}).to_string(),
        };

        if socket.send(WsMessage::Text(reply)).await.is_err() {
            break;
        }
    }
}
