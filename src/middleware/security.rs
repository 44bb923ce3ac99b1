// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Security headers middleware.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

/// Headers set on every response, errors included.
///
/// Responses carry live positions, so nothing may be cached or framed.
pub const SECURITY_HEADERS: [(&str, &str); 5] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    (
        "content-security-policy",
        "default-src 'none'; frame-ancestors 'none'",
    ),
    ("referrer-policy", "no-referrer"),
    ("cache-control", "no-store"),
];

pub async fn add_security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::{routing::get, Router};
    use tower::ServiceExt;

    fn router() -> Router {
        Router::new()
            .route(
                "/entities/{id}/location",
                get(|| async {
                    ([(header::CACHE_CONTROL, "max-age=60")], r#"{"latitude":37.77}"#)
                }),
            )
            .route(
                "/offers/{id}/accept",
                get(|| async { (StatusCode::CONFLICT, "offer expired").into_response() }),
            )
            .layer(axum::middleware::from_fn(add_security_headers))
    }

    async fn headers_for(uri: &str) -> (StatusCode, axum::http::HeaderMap) {
        let response = router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        (response.status(), response.headers().clone())
    }

    #[tokio::test]
    async fn location_responses_are_never_cacheable() {
        let (status, headers) = headers_for("/entities/driver-1/location").await;
        assert_eq!(status, StatusCode::OK);
        for (name, value) in SECURITY_HEADERS {
            assert_eq!(headers.get(name).unwrap(), value, "{name}");
        }
        // A handler's own caching hint is overridden.
        assert_eq!(headers.get_all(header::CACHE_CONTROL).iter().count(), 1);
    }

    #[tokio::test]
    async fn error_responses_carry_headers_too() {
        let (status, headers) = headers_for("/offers/o1/accept").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(headers.get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    }
}
