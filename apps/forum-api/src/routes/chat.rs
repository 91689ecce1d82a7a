use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::gateway::events::ChatMessage;
use crate::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/online_users", get(online_users))
        .route("/chat_history", get(chat_history))
}

// ---------------------------------------------------------------------------
// GET /api/online_users
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct OnlineUser {
    pub id: i64,
    pub username: String,
    pub online: bool,
    /// Unix seconds of the newest message with the requester, 0 if none.
    #[serde(rename = "lastMessageTime")]
    pub last_message_time: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OnlineUsersResponse {
    pub users: Vec<OnlineUser>,
}

#[utoipa::path(
    get,
    path = "/api/online_users",
    tag = "Chat",
    security(("session" = [])),
    responses(
        (status = 200, description = "Every other user with presence", body = OnlineUsersResponse),
        (status = 401, description = "Not logged in", body = ApiErrorBody),
    ),
)]
pub async fn online_users(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<OnlineUsersResponse>, ApiError> {
    let everyone = state.users.list_users().await?;

    let mut users = Vec::with_capacity(everyone.len());
    for user in everyone.into_iter().filter(|u| u.id != user_id) {
        let last_message_time = match state.messages.last_message_at(user_id, user.id).await {
            Ok(at) => at.map(|t| t.timestamp()).unwrap_or(0),
            Err(e) => {
                tracing::warn!(error = %e, peer = user.id, "last message lookup failed");
                0
            }
        };
        users.push(OnlineUser {
            online: state.hub.is_online(user.id),
            id: user.id,
            username: user.username,
            last_message_time,
        });
    }

    Ok(Json(OnlineUsersResponse { users }))
}

// ---------------------------------------------------------------------------
// GET /api/chat_history
// ---------------------------------------------------------------------------

/// Raw query strings so malformed numbers surface as our own 400 body.
#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryParams {
    /// The other participant.
    pub user_id: Option<String>,
    /// Page size, default 20.
    pub limit: Option<String>,
    /// Rows to skip, default 0.
    pub offset: Option<String>,
}

struct HistoryQuery {
    peer: i64,
    limit: i64,
    offset: i64,
}

impl HistoryParams {
    fn parse(&self) -> Result<HistoryQuery, ApiError> {
        let peer = match self.user_id.as_deref() {
            None | Some("") => return Err(ApiError::bad_request("Missing user_id parameter")),
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| ApiError::bad_request("Invalid user_id parameter"))?,
        };

        let limit = match self.limit.as_deref() {
            None | Some("") => DEFAULT_HISTORY_LIMIT,
            Some(raw) => match raw.parse::<i64>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ApiError::bad_request("Invalid limit parameter")),
            },
        };

        let offset = match self.offset.as_deref() {
            None | Some("") => 0,
            Some(raw) => match raw.parse::<i64>() {
                Ok(n) if n >= 0 => n,
                _ => return Err(ApiError::bad_request("Invalid offset parameter")),
            },
        };

        Ok(HistoryQuery {
            peer,
            limit,
            offset,
        })
    }
}

#[utoipa::path(
    get,
    path = "/api/chat_history",
    tag = "Chat",
    security(("session" = [])),
    params(HistoryParams),
    responses(
        (status = 200, description = "Messages with the peer, newest first", body = Vec<ChatMessage>),
        (status = 400, description = "Bad query parameters", body = ApiErrorBody),
        (status = 401, description = "Not logged in", body = ApiErrorBody),
    ),
)]
pub async fn chat_history(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let query = params.parse()?;
    let messages = state
        .messages
        .history(user_id, query.peer, query.limit, query.offset)
        .await?;
    Ok(Json(messages))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(user_id: Option<&str>, limit: Option<&str>, offset: Option<&str>) -> HistoryParams {
        HistoryParams {
            user_id: user_id.map(String::from),
            limit: limit.map(String::from),
            offset: offset.map(String::from),
        }
    }

    #[test]
    fn defaults_apply_when_absent() {
        let q = params(Some("7"), None, None).parse().unwrap();
        assert_eq!((q.peer, q.limit, q.offset), (7, 20, 0));
    }

    #[test]
    fn missing_or_bad_peer_rejected() {
        assert!(params(None, None, None).parse().is_err());
        assert!(params(Some("abc"), None, None).parse().is_err());
    }

    #[test]
    fn limit_must_be_positive() {
        assert!(params(Some("1"), Some("0"), None).parse().is_err());
        assert!(params(Some("1"), Some("-3"), None).parse().is_err());
        assert_eq!(params(Some("1"), Some("5"), None).parse().unwrap().limit, 5);
    }

    #[test]
    fn offset_may_be_zero_but_not_negative() {
        assert_eq!(params(Some("1"), None, Some("0")).parse().unwrap().offset, 0);
        assert!(params(Some("1"), None, Some("-1")).parse().is_err());
        assert!(params(Some("1"), None, Some("x")).parse().is_err());
    }
}
