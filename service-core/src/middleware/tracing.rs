use axum::http::HeaderValue;
use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 128;

/// Request id of the current request, available as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// A caller-supplied id is kept only if it is short, printable ASCII.
fn accepted_request_id(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    (!raw.is_empty()
        && raw.len() <= MAX_REQUEST_ID_LEN
        && raw.bytes().all(|b| b.is_ascii_graphic()))
    .then_some(raw)
}

/// Propagates the caller's `x-request-id` or mints a new one, and echoes it
/// on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(accepted_request_id)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&request_id).ok();

    if let Some(value) = header_value.clone() {
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    req.extensions_mut().insert(RequestId(request_id));

    let mut response = next.run(req).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
