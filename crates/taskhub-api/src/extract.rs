//! Request body extraction that reports failures through [`ApiError`].

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::error::{ApiError, ValidationErrors};

type PathError = serde_path_to_error::Error<serde_json::Error>;

/// A JSON request body.
///
/// A body that does not fit the target type becomes a 422 keyed by the
/// offending field, and malformed JSON a 400, both with the usual error body.
/// An empty body reads as `{}`.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        parse_body(&bytes).map(JsonBody)
    }
}

pub fn parse_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    let bytes = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        bytes
    };

    let mut de = serde_json::Deserializer::from_slice(bytes);
    let value = serde_path_to_error::deserialize(&mut de).map_err(reject)?;
    de.end().map_err(|_| malformed())?;
    Ok(value)
}

fn malformed() -> ApiError {
    ApiError::BadRequest("The request body is not valid JSON.".to_string())
}

fn reject(err: PathError) -> ApiError {
    match err.inner().classify() {
        Category::Data => {
            let (field, message) = describe(&err);
            let mut errors = ValidationErrors::new();
            errors.add(&field, message);
            ApiError::Validation(errors)
        }
        _ => malformed(),
    }
}

/// The field a data error belongs to, and a message for it.
fn describe(err: &PathError) -> (String, String) {
    let detail = err.inner().to_string();

    // Unknown and missing fields are reported by the parent struct, so the
    // name comes from the message rather than the path.
    if let Some(field) = quoted_after(&detail, "unknown field `") {
        let message = format!("The {} field is prohibited.", label(field));
        return (field.to_string(), message);
    }
    if let Some(field) = quoted_after(&detail, "missing field `") {
        let message = format!("The {} field is required.", label(field));
        return (field.to_string(), message);
    }

    let path = err.path().to_string();
    let field = if path == "." { "body".to_string() } else { path };
    let message = if field == "project_id" {
        "The selected project id is invalid.".to_string()
    } else if detail.contains("expected a string") {
        format!("The {} field must be a string.", label(&field))
    } else {
        format!("The {} field is invalid.", label(&field))
    };
    (field, message)
}

fn quoted_after<'a>(detail: &'a str, prefix: &str) -> Option<&'a str> {
    detail.strip_prefix(prefix)?.split('`').next()
}

fn label(field: &str) -> String {
    field.replace('_', " ")
}
