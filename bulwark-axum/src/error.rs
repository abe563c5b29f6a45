use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use bulwark::Error;
use serde_json::json;
use thiserror::Error;

/// HTTP rejection for guard errors.
///
/// A lockout becomes `429 Too Many Requests` with a `Retry-After` header in
/// seconds, validation failures become `400 Bad Request` and everything else
/// is an opaque `500`.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct GuardRejection(#[from] pub Error);

impl IntoResponse for GuardRejection {
    fn into_response(self) -> Response {
        let error = self.0;

        if let Some(minutes) = error.retry_after_minutes() {
            let status = StatusCode::TOO_MANY_REQUESTS;
            let body = Json(json!({
                "error": error.to_string(),
                "code": status.as_u16(),
                "retry_after_minutes": minutes,
            }));

            let mut response = (status, body).into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(minutes.saturating_mul(60)));
            return response;
        }

        let (status, error_message) = if error.is_validation_error() {
            (StatusCode::BAD_REQUEST, error.to_string())
        } else {
            tracing::error!(error = %error, "Guard operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        };

        let body = Json(json!({
            "error": error_message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GuardRejection>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::post};
    use bulwark::{
        GuardOrchestrator, GuardOrchestratorBuilder, InMemoryRepositoryProvider, RequestContext,
        SensitiveFields,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn guard() -> Arc<GuardOrchestrator<InMemoryRepositoryProvider>> {
        let _ = tracing_subscriber::fmt().try_init();
        Arc::new(
            GuardOrchestratorBuilder::new()
                .with_in_memory()
                .build()
                .await
                .unwrap(),
        )
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_lockout_maps_to_429_with_retry_after() {
        let guard = guard().await;
        let ctx = RequestContext::new("10.0.0.5", None);
        for _ in 0..5 {
            guard
                .record_login_attempt(&ctx, "a@b.com", false)
                .await
                .unwrap();
        }

        let app = Router::new().route(
            "/login",
            post(move || {
                let guard = guard.clone();
                async move {
                    let ctx = RequestContext::new("10.0.0.5", None);
                    guard.check_login_allowed(&ctx, "a@b.com").await?;
                    Ok::<_, GuardRejection>("welcome")
                }
            }),
        );

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: i64 = response.headers()[RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((60..=30 * 60).contains(&retry_after));
        assert_eq!(retry_after % 60, 0);

        let body = json_body(response).await;
        assert_eq!(body["code"], 429);
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .starts_with("Too many login attempts.")
        );
    }

    #[tokio::test]
    async fn test_validation_error_maps_to_400() {
        let guard = guard().await;
        let err = guard.can_attempt_login("", "10.0.0.5").await.unwrap_err();

        let response = GuardRejection::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(RETRY_AFTER).is_none());

        let body = json_body(response).await;
        assert_eq!(body["code"], 400);
    }

    #[tokio::test]
    async fn test_other_errors_are_opaque_500() {
        struct Card {
            number: Option<String>,
        }

        impl SensitiveFields for Card {
            fn sensitive_fields(&mut self) -> Vec<&mut Option<String>> {
                vec![&mut self.number]
            }
        }

        let guard = guard().await;
        let mut card = Card {
            number: Some("4111111111111111".to_string()),
        };
        let err = guard.seal_record(&mut card).unwrap_err();

        let response = GuardRejection::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = json_body(response).await;
        assert_eq!(body["error"], "Internal server error");
    }
}
