use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use crate::models::auth::{Caller, Role};

/// Identity is terminated upstream (API gateway); requests arrive with the
/// resolved subject and role. The engine only authorizes by capability.
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let subject_id = parts
            .headers
            .get("X-Subject-Id")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing X-Subject-Id header"))?;

        let role = parts
            .headers
            .get("X-Role")
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing X-Role header"))?;
        let role: Role = role
            .parse()
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Unknown role"))?;

        Ok(Caller {
            subject_id: subject_id.to_string(),
            role,
        })
    }
}
