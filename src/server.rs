//! Native HTTP server: actix-web in front of the Spin-typed router.

use std::time::Instant;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use tracing::info;

use crate::router;
use crate::state::AppState;

mod adapter {
    use actix_web::http::StatusCode;
    use actix_web::HttpRequest;
    use spin_sdk::http::{Method, Request, Response};

    pub fn actix_to_spin_request(req: &HttpRequest, body: actix_web::web::Bytes) -> Request {
        let method = match req.method().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            other => Method::Other(other.to_string()),
        };

        let mut builder = Request::builder();
        builder.method(method).uri(req.uri().to_string());

        for (name, value) in req.headers() {
            if let Ok(val_str) = value.to_str() {
                builder.header(name.as_str(), val_str);
            }
        }

        builder.body(body.to_vec()).build()
    }

    pub fn spin_to_actix_response(spin_resp: Response) -> actix_web::HttpResponse {
        let status = StatusCode::from_u16(*spin_resp.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = actix_web::HttpResponse::build(status);
        if let Some(content_type) = spin_resp.header("Content-Type").and_then(|h| h.as_str()) {
            response.content_type(content_type);
        }

        response.body(spin_resp.body().to_vec())
    }
}

/// Catch-all service: every request goes through [`router::handle`].
pub async fn handle_all(state: web::Data<AppState>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
    let started = Instant::now();
    let spin_req = adapter::actix_to_spin_request(&req, body);
    let spin_resp = router::handle(&state, spin_req);
    let status = *spin_resp.status();

    info!(
        method = %req.method(),
        path = %req.path(),
        status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );

    adapter::spin_to_actix_response(spin_resp)
}

/// Upper bound on buffered request bodies: one maximal image plus form overhead.
pub fn payload_limit(state: &AppState) -> usize {
    state.config.max_upload_bytes + 64 * 1024
}

pub async fn run(state: AppState) -> std::io::Result<()> {
    let bind_addr = state.config.bind_addr.clone();
    let limit = payload_limit(&state);
    let data = web::Data::new(state);

    info!("Server listening on http://{}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .app_data(web::PayloadConfig::new(limit))
            .default_service(web::route().to(handle_all))
    })
    .bind(bind_addr)?
    .run()
    .await
}
