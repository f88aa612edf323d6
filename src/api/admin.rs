//! Admin API endpoints (§4.J): hot-reload the puppet registry, and
//! register a double-puppet mapping.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::config::PuppetEntry;
use crate::double_puppet::DoublePuppetRegistry;
use crate::ids::RemoteUserId;

use super::ApiState;

/// Matches the teacher's `{error: {code, message}}` JSON error shape.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

fn error_response(code: &str, message: &str) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        error: ErrorDetail {
            code: code.to_string(),
            message: message.to_string(),
        },
    })
}

/// `{added, removed, total}` response for `/api/reload-puppets`.
#[derive(Serialize)]
pub struct ReloadResponse {
    pub added: usize,
    pub removed: usize,
    pub total: usize,
}

/// `POST /api/reload-puppets` (§4.J). An empty body reloads from the
/// environment; a non-empty body is parsed as a JSON array of desired
/// puppet entries.
pub async fn reload_puppets(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<ReloadResponse>, (StatusCode, Json<ErrorResponse>)> {
    let desired: Vec<PuppetEntry> = if body.is_empty() {
        crate::config::load_puppets_from_env(state.default_server_url.as_deref())
    } else {
        serde_json::from_slice(&body).map_err(|e| (StatusCode::BAD_REQUEST, error_response("invalid_body", &e.to_string())))?
    };

    let before = state.puppets.entries_snapshot();
    let desired_mxids: std::collections::HashSet<&str> = desired.iter().map(|e| e.mxid.as_str()).collect();

    let outcome = state.puppets.reload(desired).await;

    for (mxid, remote_user_id) in before {
        if !desired_mxids.contains(mxid.as_str()) {
            state.double_puppets.remove(&remote_user_id);
        }
    }

    Ok(Json(ReloadResponse {
        added: outcome.added,
        removed: outcome.removed,
        total: outcome.total,
    }))
}

#[derive(Deserialize)]
pub struct DoublePuppetRequest {
    pub mm_user_id: String,
    pub matrix_mxid: String,
}

#[derive(Serialize)]
pub struct DoublePuppetResponse {
    pub mm_user_id: String,
    pub matrix_mxid: String,
    pub status: &'static str,
}

/// `POST /api/double-puppet` (§4.J). Invokes [`DoublePuppetRegistry::enrol`]
/// for the given remote-user-ID/MXID pair.
pub async fn register_double_puppet(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<DoublePuppetRequest>,
) -> Result<Json<DoublePuppetResponse>, (StatusCode, Json<ErrorResponse>)> {
    if req.mm_user_id.is_empty() || req.matrix_mxid.is_empty() {
        return Err((StatusCode::BAD_REQUEST, error_response("missing_field", "mm_user_id and matrix_mxid are both required")));
    }

    let remote_user_id = RemoteUserId::encode(req.mm_user_id.clone());
    let registry: &DoublePuppetRegistry = &state.double_puppets;
    registry
        .enrol(state.framework.as_ref(), &remote_user_id, &req.matrix_mxid)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, error_response("enrol_failed", &e.to_string())))?;

    Ok(Json(DoublePuppetResponse {
        mm_user_id: req.mm_user_id,
        matrix_mxid: req.matrix_mxid,
        status: "ok",
    }))
}
