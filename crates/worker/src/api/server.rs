use crate::api::routes::benchmark::benchmark_routes;
use crate::api::routes::status::status_routes;
use crate::state::WorkerState;
use actix_web::{middleware, web, web::Data, App, HttpResponse, HttpServer};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub worker_state: Arc<WorkerState>,
}

pub async fn start_server(
    host: &str,
    port: u16,
    worker_state: Arc<WorkerState>,
) -> std::io::Result<()> {
    let app_state = Data::new(AppState { worker_state });

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(web::JsonConfig::default().limit(64 * 1024))
            .wrap(middleware::Logger::default())
            .service(benchmark_routes())
            .service(status_routes())
            .default_service(web::route().to(|| async {
                HttpResponse::NotFound().json(json!({
                    "success": false,
                    "error": "Resource not found"
                }))
            }))
    })
    .bind((host, port))?
    .run()
    .await
}
