use crate::errors::ApiError;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Header carrying the caller's identity, set by the edge gateway after
/// it has verified the session.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity of the authenticated shopper making the request.
///
/// Authentication itself happens upstream; this extractor only reads
/// the identity header the gateway forwards and rejects requests that
/// arrive without one.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedShopper(pub Uuid);

impl<S> FromRequestParts<S> for AuthenticatedShopper
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let shopper_id = Uuid::parse_str(value).map_err(|_| ApiError::Unauthorized)?;
        Ok(Self(shopper_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<AuthenticatedShopper, ApiError> {
        let (mut parts, _) = request.into_parts();
        AuthenticatedShopper::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn accepts_valid_header() {
        let id = Uuid::new_v4();
        let request = Request::builder()
            .header(USER_ID_HEADER, id.to_string())
            .body(())
            .unwrap();

        let shopper = extract(request).await.unwrap();
        assert_eq!(shopper.0, id);
    }

    #[tokio::test]
    async fn rejects_missing_header() {
        let request = Request::builder().body(()).unwrap();
        assert!(matches!(
            extract(request).await,
            Err(ApiError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn rejects_malformed_header() {
        let request = Request::builder()
            .header(USER_ID_HEADER, "not-a-uuid")
            .body(())
            .unwrap();
        assert!(matches!(
            extract(request).await,
            Err(ApiError::Unauthorized)
        ));
    }
}
