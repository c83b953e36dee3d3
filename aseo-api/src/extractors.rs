//! Request extractors for the two credential headers: the tenant API key and
//! the admin shared secret.
//!
//! Implemented as `FromRequestParts` rather than `axum::middleware::from_fn`
//! so each handler's signature documents exactly which credential it needs.

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use chrono::Utc;

use aseo_core::billing::GateOutcome;
use aseo_core::CoreError;

use crate::error::ApiError;
use crate::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";
const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// A request authenticated and gated against the tenant's quota. Extracting
/// this runs `authenticate_and_gate` as a side effect, so every tenant route
/// that takes it is, by construction, quota-checked.
pub struct TenantCredential(pub GateOutcome);

#[async_trait]
impl<S> FromRequestParts<S> for TenantCredential
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(CoreError::from(aseo_core::GateError::InvalidCredential))?;

        let outcome = app_state.billing.authenticate_and_gate(key, Utc::now()).await?;
        Ok(TenantCredential(outcome))
    }
}

/// A request presenting the admin shared secret.
pub struct AdminSecret;

#[async_trait]
impl<S> FromRequestParts<S> for AdminSecret
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let provided = parts.headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok());
        match provided {
            Some(secret) if secret == app_state.admin_secret => Ok(AdminSecret),
            _ => Err(ApiError(CoreError::UnauthorizedAdmin)),
        }
    }
}
