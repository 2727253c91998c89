//! Caller identity. Session management lives in the upstream auth layer,
//! which terminates authentication and forwards the stable user id and
//! email as trusted headers; this service only consumes them.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

use crate::error::AppError;

const USER_ID_HEADER: &str = "x-user-id";
const USER_EMAIL_HEADER: &str = "x-user-email";

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: String,
    pub email: String,
}

impl CurrentUser {
    fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        match (get(USER_ID_HEADER), get(USER_EMAIL_HEADER)) {
            (Some(user_id), Some(email)) => Ok(CurrentUser { user_id, email }),
            _ => Err(AppError::Unauthorized),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_user_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("user-1"));
        headers.insert(USER_EMAIL_HEADER, HeaderValue::from_static("u@example.com"));
        let user = CurrentUser::from_headers(&headers).unwrap();
        assert_eq!(user.user_id, "user-1");
        assert_eq!(user.email, "u@example.com");
    }

    #[test]
    fn missing_or_empty_headers_are_unauthorized() {
        let mut headers = HeaderMap::new();
        assert!(CurrentUser::from_headers(&headers).is_err());
        headers.insert(USER_ID_HEADER, HeaderValue::from_static(""));
        headers.insert(USER_EMAIL_HEADER, HeaderValue::from_static("u@example.com"));
        assert!(CurrentUser::from_headers(&headers).is_err());
    }
}
