use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use actix_web::{App, HttpResponse, HttpServer, http::header, web, web::Bytes};
use async_stream::stream;

use crate::pipeline::{
    codec,
    stream::{LatestFrame, SharedPacket, Upload},
};

/// Uploads larger than this are rejected by actix before reaching the route.
const MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub uploads: LatestFrame,
    pub packets: SharedPacket,
    pub stream_interval: Duration,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES))
        .route("/upload", web::post().to(upload_handler))
        .route("/log", web::post().to(log_handler))
        .route("/stream", web::get().to(stream_handler))
        .route("/frame.jpg", web::get().to(frame_handler));
}

pub async fn run_server(bind: SocketAddr, state: AppState) -> std::io::Result<()> {
    log::info!("listening on http://{bind}");
    let data = web::Data::new(state);
    HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .bind(bind)?
        .run()
        .await
}

async fn upload_handler(state: web::Data<AppState>, body: Bytes) -> HttpResponse {
    if body.is_empty() {
        return HttpResponse::BadRequest().body("No frame received");
    }
    state.uploads.offer(Upload {
        jpeg: body.to_vec(),
        received: Instant::now(),
    });
    HttpResponse::Ok().body("Frame received")
}

async fn log_handler(body: String) -> HttpResponse {
    log::info!("client: {}", body.trim());
    HttpResponse::NoContent().finish()
}

async fn frame_handler(state: web::Data<AppState>) -> HttpResponse {
    match state.packets.latest() {
        Some(packet) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .body((*packet.jpeg).clone()),
        None => HttpResponse::NoContent().finish(),
    }
}

async fn stream_handler(state: web::Data<AppState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(state.stream_interval);
        let mut seen = 0;
        loop {
            interval.tick().await;
            if let Some(packet) = state.packets.newer_than(seen) {
                seen = packet.sequence;
                yield Ok::<Bytes, actix_web::Error>(Bytes::from(codec::mjpeg_part(&packet.jpeg)));
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .append_header((header::CACHE_CONTROL, "no-cache"))
        .content_type(codec::STREAM_CONTENT_TYPE)
        .streaming(stream)
}
