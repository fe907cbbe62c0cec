//! `Cache-Control` decoration of cached responses.

use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode, header::CACHE_CONTROL, header::InvalidHeaderValue},
    response::Response,
};

/// `max-age=<ttl seconds>, private`
pub fn cache_control_value(ttl: Duration) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!("max-age={}, private", ttl.as_secs()))
}

/// Response mapper for [`axum::middleware::map_response_with_state`]: marks
/// `200 OK` responses as privately cacheable, leaves everything else alone.
pub async fn add_cache_control(State(value): State<HeaderValue>, mut response: Response) -> Response {
    if response.status() == StatusCode::OK {
        response.headers_mut().insert(CACHE_CONTROL, value);
    }
    response
}
