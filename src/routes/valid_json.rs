use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};
use axum_valid::{Valid, ValidationRejection};
use validator::ValidationErrors;

use crate::error::AppError;

/// `Valid<Json<T>>` whose rejections render as the typed error body.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    Valid<Json<T>>: FromRequest<S, Rejection = ValidationRejection<ValidationErrors, JsonRejection>>,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Valid::<Json<T>>::from_request(req, state).await {
            Ok(Valid(Json(value))) => Ok(ValidJson(value)),
            Err(ValidationRejection::Valid(errors)) => Err(errors.into()),
            Err(ValidationRejection::Inner(rejection)) => Err(rejection.into()),
        }
    }
}
