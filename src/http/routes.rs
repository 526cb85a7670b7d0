use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::{Method, Request, Response, StatusCode, body::Incoming};
use serde::Deserialize;
use serde_json::json;

use super::response::{Body, error_json, html, json};
use crate::{
    manager::{AddRuleRequest, Manager, ManagerError},
    process::{ProcessHost, StopOutcome},
    rules::RuleAccessor,
};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct DeleteProxyRequest {
    #[serde(default)]
    name: String,
}

pub(super) async fn handle<R, H>(manager: &Manager<R, H>, request: Request<Incoming>) -> Response<Body>
where
    R: RuleAccessor,
    H: ProcessHost,
{
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let body = match Limited::new(request.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            return error_json(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {error}"),
            );
        }
    };
    let response = route(manager, &method, &path, body).await;
    tracing::debug!(%method, %path, status = response.status().as_u16(), "handled request");
    response
}

/// Dispatch one request with an already collected body.
pub(super) async fn route<R, H>(
    manager: &Manager<R, H>,
    method: &Method,
    path: &str,
    body: Bytes,
) -> Response<Body>
where
    R: RuleAccessor,
    H: ProcessHost,
{
    let allowed = match path {
        "/" | "/index.html" | "/api/rules" | "/api/default-name" | "/api/proxies"
        | "/api/tunnel/status" => Method::GET,
        "/api/add" | "/api/proxies/delete" | "/api/tunnel/start" | "/api/tunnel/stop"
        | "/api/tunnel/restart" => Method::POST,
        _ => return error_json(StatusCode::NOT_FOUND, format!("no route for {path}")),
    };
    if *method != allowed {
        return error_json(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    let result = match path {
        "/" | "/index.html" => return index(manager).await,
        "/api/rules" => manager
            .list_rules()
            .await
            .map(|rules| json(StatusCode::OK, &rules)),
        "/api/default-name" => manager
            .default_identity()
            .await
            .map(|name| json(StatusCode::OK, &json!({ "name": name }))),
        "/api/proxies" => manager
            .list_proxies()
            .await
            .map(|proxies| json(StatusCode::OK, &proxies)),
        "/api/add" => match parse_body::<AddRuleRequest>(&body) {
            Ok(request) => manager.add_rule(&request).await.map(|proxy| {
                json(StatusCode::OK, &json!({ "status": "success", "proxy": proxy }))
            }),
            Err(response) => return response,
        },
        "/api/proxies/delete" => match parse_body::<DeleteProxyRequest>(&body) {
            Ok(request) => manager.delete_proxy(&request.name).await.map(|removed| {
                json(
                    StatusCode::OK,
                    &json!({ "status": "success", "removed": removed }),
                )
            }),
            Err(response) => return response,
        },
        "/api/tunnel/start" => manager.tunnel_start().await.map(|pid| {
            json(
                StatusCode::OK,
                &json!({ "status": "success", "message": "tunnel client started", "pid": pid }),
            )
        }),
        "/api/tunnel/stop" => manager.tunnel_stop().await.map(|outcome| {
            let (message, pid) = match outcome {
                StopOutcome::NotRunning => ("tunnel client was not running", None),
                StopOutcome::Stopped { pid } => ("tunnel client stopped", Some(pid)),
            };
            json(
                StatusCode::OK,
                &json!({ "status": "success", "message": message, "pid": pid }),
            )
        }),
        "/api/tunnel/restart" => manager.tunnel_restart().await.map(|pid| {
            json(
                StatusCode::OK,
                &json!({ "status": "success", "message": "tunnel client restarted", "pid": pid }),
            )
        }),
        "/api/tunnel/status" => manager
            .tunnel_status()
            .await
            .map(|state| json(StatusCode::OK, &state)),
        _ => return error_json(StatusCode::NOT_FOUND, format!("no route for {path}")),
    };

    result.unwrap_or_else(|error| manager_error(path, error))
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &Bytes) -> Result<T, Response<Body>> {
    serde_json::from_slice(body)
        .map_err(|error| error_json(StatusCode::BAD_REQUEST, format!("invalid request body: {error}")))
}

fn manager_error(path: &str, error: ManagerError) -> Response<Body> {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(%error, path, "request failed");
    } else {
        tracing::debug!(%error, path, "rejected request");
    }
    error_json(status, error)
}

async fn index<R, H>(manager: &Manager<R, H>) -> Response<Body>
where
    R: RuleAccessor,
    H: ProcessHost,
{
    let path = manager.settings().server.static_dir.join("index.html");
    match tokio::fs::read(&path).await {
        Ok(content) => html(content),
        Err(error) => {
            tracing::warn!(%error, path = %path.display(), "index page unavailable");
            error_json(StatusCode::NOT_FOUND, "index.html not found")
        }
    }
}
