use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde_json::json;
use shared::models::api::ApiResponse;

use crate::validator::ValidatorHealth;

pub(crate) struct State {
    pub validator_health: Arc<tokio::sync::Mutex<ValidatorHealth>>,
}

pub(crate) async fn health_check(_: HttpRequest, state: web::Data<State>) -> impl Responder {
    // Maximum allowed time between scheduler ticks (2 minutes)
    const MAX_TICK_INTERVAL_SECS: u64 = 120;

    let validator_health = state.validator_health.lock().await;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    if validator_health.last_tick_timestamp() == 0 {
        return HttpResponse::Ok().json(json!({
            "status": "starting",
            "message": "Scheduler hasn't ticked yet"
        }));
    }

    let elapsed = now.saturating_sub(validator_health.last_tick_timestamp());

    if elapsed > MAX_TICK_INTERVAL_SECS {
        return HttpResponse::ServiceUnavailable().json(json!({
            "status": "error",
            "message": format!("Scheduler hasn't ticked in {elapsed} seconds (max allowed: {MAX_TICK_INTERVAL_SECS})"),
            "last_tick_duration_ms": validator_health.last_tick_duration_ms(),
        }));
    }

    HttpResponse::Ok().json(json!({
        "status": "ok",
        "last_tick_seconds_ago": elapsed,
        "last_tick_duration_ms": validator_health.last_tick_duration_ms(),
    }))
}

pub(crate) async fn get_term(state: web::Data<State>) -> impl Responder {
    let validator_health = state.validator_health.lock().await;
    match validator_health.term() {
        Some(summary) => HttpResponse::Ok().json(ApiResponse::ok(summary.clone())),
        None => HttpResponse::ServiceUnavailable().json(ApiResponse::failed("No term observed yet")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::TermState;
    use actix_web::{test, App};

    fn app_state(health: ValidatorHealth) -> web::Data<State> {
        web::Data::new(State {
            validator_health: Arc::new(tokio::sync::Mutex::new(health)),
        })
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[actix_web::test]
    async fn test_health_before_first_tick() {
        let app = test::init_service(
            App::new()
                .app_data(app_state(ValidatorHealth::new()))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "starting");
    }

    #[actix_web::test]
    async fn test_stale_scheduler_is_unhealthy() {
        let mut health = ValidatorHealth::new();
        health.update(now() - 600, 12, None);
        let app = test::init_service(
            App::new()
                .app_data(app_state(health))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_term_summary() {
        let mut health = ValidatorHealth::new();
        let mut term = TermState::new(7, 1, 2);
        term.seed_committed = true;
        health.update(now(), 3, Some(term.summary(12)));
        let app = test::init_service(
            App::new()
                .app_data(app_state(health))
                .route("/term", web::get().to(get_term)),
        )
        .await;

        let req = test::TestRequest::get().uri("/term").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["term"], 7);
        assert_eq!(body["data"]["offset"], 12);
        assert_eq!(body["data"]["seed_committed"], true);
    }

    #[actix_web::test]
    async fn test_term_unavailable_before_first_tick() {
        let app = test::init_service(
            App::new()
                .app_data(app_state(ValidatorHealth::new()))
                .route("/term", web::get().to(get_term)),
        )
        .await;

        let req = test::TestRequest::get().uri("/term").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);
    }
}
