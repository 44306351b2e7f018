use crate::api::server::AppState;
use actix_web::{
    web::{self, get, Data},
    HttpResponse, Scope,
};

/// Answered for every caller, so validators can tell live workers apart.
pub async fn get_status(app_state: Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(app_state.worker_state.status())
}

pub fn status_routes() -> Scope {
    web::scope("/status")
        .route("", get().to(get_status))
        .route("/", get().to(get_status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkerState;
    use actix_web::{test, App};
    use shared::models::benchmark::WorkerStatus;
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_status_reports_job_state() {
        let worker_state = Arc::new(WorkerState::new("0.3.0"));
        let app = test::init_service(
            App::new()
                .app_data(Data::new(AppState {
                    worker_state: worker_state.clone(),
                }))
                .service(status_routes()),
        )
        .await;

        let req = test::TestRequest::get().uri("/status").to_request();
        let status: WorkerStatus = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status.version, "0.3.0");
        assert_eq!(status.job_id, 0);

        let _guard = worker_state.begin_benchmark();
        let req = test::TestRequest::get().uri("/status").to_request();
        let status: WorkerStatus = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status.job_id, 1);
        assert!(status.is_available());
    }
}
