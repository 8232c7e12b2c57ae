/// Request extractors
use crate::error::ApiError;
use axum::extract::FromRequest;

/// `axum::Json` whose rejection is an `ApiError`: malformed or incomplete
/// bodies become 400 `{"error": ...}` instead of axum's plain-text 422.
#[derive(Debug, Clone, Copy, Default, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
