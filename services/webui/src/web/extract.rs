//! services/webui/src/web/extract.rs
//!
//! A JSON body extractor whose rejections use the `{code, message}` envelope.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, OptionalFromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

use crate::web::response::{fail, ApiFailure};

/// Drop-in replacement for `axum::Json` on the request side.
#[derive(Debug, Clone, Default)]
pub struct JsonBody<T>(pub T);

fn rejection(rejection: JsonRejection) -> ApiFailure {
    fail(rejection.status(), rejection.body_text())
}

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiFailure;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match <Json<T> as FromRequest<S>>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(e) => Err(rejection(e)),
        }
    }
}

/// An absent body (no `Content-Type`) yields `None`; a malformed one is still rejected.
impl<T, S> OptionalFromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiFailure;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        match <Json<T> as OptionalFromRequest<S>>::from_request(req, state).await {
            Ok(value) => Ok(value.map(|Json(value)| Self(value))),
            Err(e) => Err(rejection(e)),
        }
    }
}
