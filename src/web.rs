/*!
 # HTTP/JSON API

 Every response is a JSON object carrying `success`; failures add `error`
 and use the status from [`Error::status_code`]. The browser front-end is
 served from the static directory.
*/

use std::path::Path;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::color::Rgb;
use crate::controller::LampController;
use crate::effects::EffectDuration;
use crate::schedule::{ScheduleRequest, Scheduler, DEFAULT_DURATION_SECS};
use crate::Error;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LampController>,
    pub scheduler: Arc<Scheduler>,
}

/// Error body returned by every handler
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        if error.is_device_error() {
            warn!("Lamp request failed: {}", error);
        }
        Self {
            status: error.status_code(),
            message: error.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn ok() -> ApiResult {
    Ok(Json(json!({ "success": true })))
}

fn brightness(value: u32) -> Result<u8, Error> {
    u8::try_from(value)
        .ok()
        .filter(|b| *b <= 100)
        .ok_or(Error::ValueOutOfRange(value, 0, 100))
}

fn full_brightness() -> u32 {
    100
}

fn default_duration() -> u64 {
    DEFAULT_DURATION_SECS
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SwitchState {
    On,
    Off,
}

#[derive(Debug, Deserialize)]
struct SwitchRequest {
    state: SwitchState,
}

#[derive(Debug, Deserialize)]
struct RgbValue {
    r: u8,
    g: u8,
    b: u8,
}

#[derive(Debug, Deserialize)]
struct HsvValue {
    h: u16,
    s: u16,
    v: u16,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ColorRequest {
    Hex {
        value: String,
        #[serde(default = "full_brightness")]
        brightness: u32,
    },
    Rgb {
        value: RgbValue,
        #[serde(default = "full_brightness")]
        brightness: u32,
    },
    Hsv {
        value: HsvValue,
    },
}

#[derive(Debug, Deserialize)]
struct EffectRequest {
    name: String,
    #[serde(default = "default_duration")]
    duration: u64,
}

async fn power(
    State(state): State<AppState>,
    payload: Result<Json<SwitchRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    match request.state {
        SwitchState::On => state.controller.power_on().await?,
        SwitchState::Off => state.controller.power_off().await?,
    }
    ok()
}

async fn color(
    State(state): State<AppState>,
    payload: Result<Json<ColorRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    match request {
        ColorRequest::Hex { value, brightness: b } => {
            state.controller.set_color_hex(&value, brightness(b)?).await?
        }
        ColorRequest::Rgb { value, brightness: b } => {
            let rgb = Rgb::new(value.r, value.g, value.b);
            state.controller.set_color_rgb(rgb, brightness(b)?).await?
        }
        ColorRequest::Hsv { value } => {
            state
                .controller
                .set_color_hsv(value.h, value.s, value.v)
                .await?
        }
    }
    ok()
}

async fn effect(
    State(state): State<AppState>,
    payload: Result<Json<EffectRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    state
        .controller
        .spawn_effect(&request.name, EffectDuration::seconds(request.duration))?;
    info!("Effect {} started for {}s", request.name, request.duration);
    ok()
}

async fn stop_effect(State(state): State<AppState>) -> ApiResult {
    state.controller.stop_effect().await;
    ok()
}

async fn sync_toggle(
    State(state): State<AppState>,
    payload: Result<Json<SwitchRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let on = matches!(request.state, SwitchState::On);
    state.controller.set_sync(on).await?;
    ok()
}

async fn status(State(state): State<AppState>) -> ApiResult {
    let status = state.controller.status().await?;
    Ok(Json(json!({ "success": true, "status": status })))
}

async fn effects(State(state): State<AppState>) -> ApiResult {
    Ok(Json(json!({ "success": true, "effects": state.controller.effects() })))
}

async fn schedule_add(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let index = state.scheduler.add(&request)?;
    Ok(Json(json!({ "success": true, "index": index })))
}

async fn schedule_list(State(state): State<AppState>) -> ApiResult {
    Ok(Json(json!({ "success": true, "schedules": state.scheduler.list() })))
}

async fn schedule_history(State(state): State<AppState>) -> ApiResult {
    Ok(Json(json!({ "success": true, "schedules": state.scheduler.history() })))
}

async fn schedule_remove(
    State(state): State<AppState>,
    index: Result<UrlPath<u32>, PathRejection>,
) -> ApiResult {
    let UrlPath(index) = index?;
    state.scheduler.remove(index)?;
    ok()
}

/// Builds the API router; unknown paths fall through to `static_dir`
pub fn router(state: AppState, static_dir: impl AsRef<Path>) -> Router {
    Router::new()
        .route("/api/power", post(power))
        .route("/api/color", post(color))
        .route("/api/effect", post(effect))
        .route("/api/effect/stop", post(stop_effect))
        .route("/api/sync_toggle", post(sync_toggle))
        .route("/api/status", get(status))
        .route("/api/effects", get(effects))
        .route("/api/schedule/add", post(schedule_add))
        .route("/api/schedule/list", get(schedule_list))
        .route("/api/schedule/history", get(schedule_history))
        .route("/api/schedule/remove/{index}", delete(schedule_remove))
        .fallback_service(ServeDir::new(static_dir.as_ref()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    use super::*;
    use crate::driver::{DpsValue, DP_COLOR, DP_POWER};
    use crate::effects::EffectRegistry;
    use crate::link::testing::{HangingLamp, RecordingLamp};
    use crate::link::DeviceLink;
    use crate::schedule::SystemClock;
    use crate::LampDriver;

    fn app_with(driver: Box<dyn LampDriver>, timeout: Duration) -> Router {
        let link = DeviceLink::new(driver, timeout, Duration::ZERO);
        let controller = Arc::new(LampController::new(link, EffectRegistry::builtin()));
        let scheduler = Arc::new(Scheduler::new(
            controller.clone(),
            Arc::new(SystemClock),
            Duration::from_secs(1),
            10,
        ));
        let static_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("static");
        router(AppState { controller, scheduler }, static_dir)
    }

    fn app(recorder: &RecordingLamp) -> Router {
        app_with(Box::new(recorder.clone()), Duration::from_secs(5))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_power_and_status() {
        let recorder = RecordingLamp::default();
        let app = app(&recorder);

        let (status, body) = call(&app, Method::POST, "/api/power", Some(json!({"state": "on"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let (status, body) = call(&app, Method::GET, "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["status"]["20"], json!(true));
        assert_eq!(body["status"]["21"], json!("colour"));

        call(&app, Method::POST, "/api/power", Some(json!({"state": "off"}))).await;
        let (_, body) = call(&app, Method::GET, "/api/status", None).await;
        assert_eq!(body["status"]["20"], json!(false));
    }

    #[tokio::test]
    async fn test_color_variants() {
        let recorder = RecordingLamp::default();
        let app = app(&recorder);

        for body in [
            json!({"type": "hex", "value": "#FF0000", "brightness": 50}),
            json!({"type": "rgb", "value": {"r": 0, "g": 255, "b": 0}}),
            json!({"type": "hsv", "value": {"h": 240, "s": 999, "v": 100}}),
        ] {
            let (status, _) = call(&app, Method::POST, "/api/color", Some(body)).await;
            assert_eq!(status, StatusCode::OK);
        }

        assert_eq!(
            recorder.writes_to(DP_COLOR),
            vec![
                DpsValue::from("000003e701f4"),
                DpsValue::from("007803e703e7"),
                DpsValue::from("00f003e70064"),
            ]
        );
    }

    #[tokio::test]
    async fn test_validation_errors_are_400() {
        let recorder = RecordingLamp::default();
        let app = app(&recorder);

        let cases = [
            ("/api/color", json!({"type": "hex", "value": "red"})),
            ("/api/color", json!({"type": "hex", "value": "#FF0000", "brightness": 150})),
            ("/api/color", json!({"type": "hsv", "value": {"h": 400, "s": 0, "v": 0}})),
            ("/api/color", json!({"type": "cmyk", "value": "x"})),
            ("/api/power", json!({"state": "dim"})),
            ("/api/effect", json!({"name": "disco"})),
        ];
        for (uri, body) in cases {
            let (status, body) = call(&app, Method::POST, uri, Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}: {body}");
            assert_eq!(body["success"], json!(false));
            assert!(body["error"].is_string());
        }
        assert!(recorder.writes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_device_timeout_is_504() {
        let app = app_with(Box::new(HangingLamp), Duration::from_millis(20));

        let (status, body) = call(&app, Method::GET, "/api/status", None).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["success"], json!(false));
    }

    #[tokio::test]
    async fn test_effects_and_effect_start() {
        let recorder = RecordingLamp::default();
        let app = app(&recorder);

        let (_, body) = call(&app, Method::GET, "/api/effects", None).await;
        let effects = body["effects"].as_array().unwrap();
        assert_eq!(effects.len(), 12);
        assert_eq!(effects[1], json!("rainbow"));

        let (status, _) = call(&app, Method::POST, "/api/effect", Some(json!({"name": "strobe", "duration": 1}))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, Method::POST, "/api/effect/stop", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_sync_toggle() {
        let recorder = RecordingLamp::default();
        let app = app(&recorder);

        call(&app, Method::POST, "/api/sync_toggle", Some(json!({"state": "on"}))).await;
        let (_, body) = call(&app, Method::GET, "/api/status", None).await;
        assert_eq!(body["status"]["21"], json!("music"));
        assert_eq!(body["status"]["27"], json!(true));

        call(&app, Method::POST, "/api/sync_toggle", Some(json!({"state": "off"}))).await;
        let (_, body) = call(&app, Method::GET, "/api/status", None).await;
        assert_eq!(body["status"]["21"], json!("colour"));
        assert_eq!(body["status"]["27"], json!(false));
    }

    #[tokio::test]
    async fn test_schedule_endpoints() {
        let recorder = RecordingLamp::default();
        let app = app(&recorder);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/schedule/add",
            Some(json!({"action": "on", "time": "2099-06-01 07:30", "color": "#ff8800", "brightness": 60})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "index": 1}));

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/schedule/add",
            Some(json!({"action": "on", "time": "25:99"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("25:99"));

        let (_, body) = call(&app, Method::GET, "/api/schedule/list", None).await;
        assert_eq!(
            body["schedules"],
            json!([{
                "index": 1,
                "time": "2099-06-01 07:30:00",
                "action": "on",
                "color": "#FF8800",
                "brightness": 60,
                "state": "pending",
            }])
        );

        let (status, _) = call(&app, Method::DELETE, "/api/schedule/remove/1", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, Method::DELETE, "/api/schedule/remove/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], json!(false));

        let (_, body) = call(&app, Method::GET, "/api/schedule/list", None).await;
        assert_eq!(body["schedules"], json!([]));
        assert!(recorder.writes_to(DP_POWER).is_empty());
    }

    #[tokio::test]
    async fn test_index_page_is_served() {
        let app = app(&RecordingLamp::default());
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("/api/color"));
    }
}
