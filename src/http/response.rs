use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::{Response, StatusCode, header};
use serde::Serialize;
use serde_json::json;

pub type Body = BoxBody<Bytes, hyper::Error>;

fn full_body(content: impl Into<Bytes>) -> Body {
    Full::new(content.into())
        .map_err(|never| match never {})
        .boxed()
}

fn with_content_type(status: StatusCode, content_type: &'static str, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(content_type));
    response
}

pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(bytes) => with_content_type(status, "application/json", full_body(bytes)),
        Err(error) => {
            tracing::error!(%error, "failed to encode response body");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode response")
        }
    }
}

pub fn error_json(status: StatusCode, message: impl std::fmt::Display) -> Response<Body> {
    let body = json!({ "error": message.to_string() }).to_string();
    with_content_type(status, "application/json", full_body(body))
}

pub fn html(content: Vec<u8>) -> Response<Body> {
    with_content_type(StatusCode::OK, "text/html; charset=utf-8", full_body(content))
}
