use crate::api::server::AppState;
use actix_web::{
    web::{self, post, Data},
    HttpRequest, HttpResponse, Scope,
};
use log::{debug, error, warn};
use rand::Rng;
use serde_json::json;
use shared::models::benchmark::{BenchmarkRequest, BenchmarkShape, VALIDATOR_UID_HEADER};
use shared::models::network::Uid;

/// Largest payload a single request may ask for.
pub const MAX_PAYLOAD_BYTES: u64 = 256 * 1024 * 1024;

fn validator_uid(req: &HttpRequest) -> Option<Uid> {
    req.headers()
        .get(VALIDATOR_UID_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// `size` bytes of little-endian f32 values.
fn synthetic_payload(size: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    let mut payload = Vec::with_capacity(size);
    for _ in 0..size / 4 {
        let value: f32 = rng.random();
        payload.extend_from_slice(&value.to_le_bytes());
    }
    payload
}

pub async fn serve_benchmark(
    req: HttpRequest,
    request: web::Json<BenchmarkRequest>,
    app_state: Data<AppState>,
) -> HttpResponse {
    let Some(uid) = validator_uid(&req) else {
        return HttpResponse::Forbidden().json(json!({
            "success": false,
            "error": format!("Missing or invalid {VALIDATOR_UID_HEADER} header")
        }));
    };
    match app_state.worker_state.is_validator(uid).await {
        Some(true) => {}
        Some(false) => {
            warn!("Rejected benchmark request from non-validator {uid}");
            return HttpResponse::Forbidden().json(json!({
                "success": false,
                "error": "Caller is not a validator"
            }));
        }
        None => {
            return HttpResponse::ServiceUnavailable().json(json!({
                "success": false,
                "error": "Validator list not loaded yet"
            }));
        }
    }

    let shape = request.into_inner().shape;
    let size = match shape.payload_bytes() {
        Some(size) if size > 0 && size <= MAX_PAYLOAD_BYTES => size,
        _ => {
            return HttpResponse::BadRequest().json(json!({
                "success": false,
                "error": format!("Unsupported payload shape {shape}")
            }));
        }
    };

    let _guard = app_state.worker_state.begin_benchmark();
    debug!("Serving {size} byte payload {shape} to validator {uid}");
    match web::block(move || synthetic_payload(size as usize)).await {
        Ok(payload) => HttpResponse::Ok()
            .content_type("application/octet-stream")
            .body(payload),
        Err(e) => {
            error!("Failed to build benchmark payload: {e}");
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": "Failed to build payload"
            }))
        }
    }
}

pub fn benchmark_routes() -> Scope {
    web::scope("/benchmark")
        .route("", post().to(serve_benchmark))
        .route("/", post().to(serve_benchmark))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkerState;
    use actix_web::{body::to_bytes, test, App};
    use shared::models::network::{NetworkSnapshot, Neuron};
    use std::sync::Arc;

    async fn app_state(validators: Option<&[Uid]>) -> Data<AppState> {
        let worker_state = Arc::new(WorkerState::new("0.3.0"));
        if let Some(validators) = validators {
            let snapshot = NetworkSnapshot {
                block: 0,
                neurons: validators
                    .iter()
                    .map(|uid| Neuron {
                        uid: *uid,
                        stake: 20.0,
                        ..Default::default()
                    })
                    .collect(),
            };
            worker_state.replace_validators(&snapshot, 10.0).await;
        }
        Data::new(AppState { worker_state })
    }

    fn request(shape: Vec<usize>) -> BenchmarkRequest {
        BenchmarkRequest {
            shape: BenchmarkShape(shape),
        }
    }

    #[actix_web::test]
    async fn test_validator_receives_full_payload() {
        let state = app_state(Some(&[5])).await;
        let app =
            test::init_service(App::new().app_data(state.clone()).service(benchmark_routes()))
                .await;

        let req = test::TestRequest::post()
            .uri("/benchmark")
            .insert_header((VALIDATOR_UID_HEADER, "5"))
            .set_json(request(vec![2, 3, 4]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body.len(), 2 * 3 * 4 * 4);
        assert_eq!(state.worker_state.status().job_id, 0);
    }

    #[actix_web::test]
    async fn test_non_validator_is_forbidden() {
        let app = test::init_service(
            App::new()
                .app_data(app_state(Some(&[5])).await)
                .service(benchmark_routes()),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/benchmark")
            .insert_header((VALIDATOR_UID_HEADER, "6"))
            .set_json(request(vec![4]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);

        let req = test::TestRequest::post()
            .uri("/benchmark")
            .set_json(request(vec![4]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn test_unavailable_before_first_snapshot() {
        let app = test::init_service(
            App::new()
                .app_data(app_state(None).await)
                .service(benchmark_routes()),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/benchmark")
            .insert_header((VALIDATOR_UID_HEADER, "5"))
            .set_json(request(vec![4]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 503);
    }

    #[actix_web::test]
    async fn test_rejects_oversized_empty_and_overflowing_shapes() {
        let app = test::init_service(
            App::new()
                .app_data(app_state(Some(&[5])).await)
                .service(benchmark_routes()),
        )
        .await;

        let overflowing = vec![usize::MAX, 8];
        let wrapping = vec![(1 << 62) + 1, 4];
        for shape in [vec![1024, 1024, 1024], vec![0, 8], overflowing, wrapping] {
            let req = test::TestRequest::post()
                .uri("/benchmark")
                .insert_header((VALIDATOR_UID_HEADER, "5"))
                .set_json(request(shape))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 400);
        }
    }
}
