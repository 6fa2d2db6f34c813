//! Route handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{debug, warn};

use looptap_protocol::api::{
    ApiEnvelope, CODE_ADB_BUSY, CODE_ADB_COMMAND_FAILED, CODE_ADB_UNAVAILABLE,
    CODE_BAD_ENTER_ACTION, CODE_NEGATIVE_COORDINATE, CODE_TEXT_EMPTY, CODE_TEXT_TOO_LONG,
    CODE_UNEXPECTED_OUTPUT, ClickRange, ClickRequest, DeviceInfo, DisplayInfo, InputRequest,
    SwipeRequest,
};
use looptap_protocol::{ENTER_ACTIONS, MAX_INPUT_TEXT_LEN, commands};
use looptap_session::SessionError;

use crate::server::ApiState;

/// On-device path the uiautomator dump is written to before pulling.
const UI_DUMP_PATH: &str = "/sdcard/looptap_ui_dump.xml";

fn ok(data: serde_json::Value) -> Response {
    (StatusCode::OK, Json(ApiEnvelope::ok(data))).into_response()
}

fn bad_request(code: i32, message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiEnvelope::error(code, message, None)),
    )
        .into_response()
}

/// Maps a session failure to the 503 upstream envelope.
fn upstream_error(err: SessionError) -> Response {
    let (code, message) = match &err {
        SessionError::NoActiveSession => (CODE_ADB_UNAVAILABLE, "no active adb session".into()),
        SessionError::Busy => (CODE_ADB_BUSY, "another command is in flight".into()),
        other => (CODE_ADB_COMMAND_FAILED, format!("adb command failed: {other}")),
    };
    warn!(code, %err, "upstream failure");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiEnvelope::error(code, message, None)),
    )
        .into_response()
}

/// `GET /v1/health`.
pub async fn health() -> Response {
    ok(json!({"status": "up"}))
}

/// `GET /v1/system/info`.
pub async fn system_info(State(state): State<Arc<ApiState>>) -> Response {
    let adb = state.manager.status().await;

    let (device, display) = if adb.connected {
        match state
            .manager
            .execute_shell(
                "getprop ro.product.brand; getprop ro.product.model; \
                 getprop ro.build.version.sdk; wm size",
            )
            .await
        {
            Ok(out) => parse_device_probe(&out),
            Err(err) => {
                debug!(%err, "device probe failed");
                (DeviceInfo::default(), None)
            }
        }
    } else {
        (DeviceInfo::default(), None)
    };

    let click_range = display
        .map(|d| ClickRange::for_display(d.width, d.height))
        .unwrap_or(ClickRange {
            x_min: 0,
            y_min: 0,
            x_max: 0,
            y_max: 0,
        });

    let discovery = state.discovery.borrow().clone();
    ok(json!({
        "service": {"version": env!("CARGO_PKG_VERSION")},
        "device": device,
        "display": display,
        "clickRange": click_range,
        "adb": adb,
        "endpoints": {
            "pairing": discovery.pairing,
            "connect": discovery.connect,
        },
    }))
}

/// `POST /v1/control/click`.
pub async fn click(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ClickRequest>,
) -> Response {
    if req.x < 0 || req.y < 0 {
        return bad_request(
            CODE_NEGATIVE_COORDINATE,
            format!("coordinates must be non-negative, got ({}, {})", req.x, req.y),
        );
    }

    let command = commands::tap(req.x, req.y);
    match state.manager.execute_shell(&command).await {
        Ok(_) => ok(json!({"command": command})),
        Err(err) => upstream_error(err),
    }
}

/// `POST /v1/control/swipe`.
pub async fn swipe(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SwipeRequest>,
) -> Response {
    if req.start_x < 0 || req.start_y < 0 || req.end_x < 0 || req.end_y < 0 {
        return bad_request(
            CODE_NEGATIVE_COORDINATE,
            "swipe coordinates must be non-negative",
        );
    }

    let command = commands::swipe(req.start_x, req.start_y, req.end_x, req.end_y, req.duration_ms);
    match state.manager.execute_shell(&command).await {
        Ok(_) => ok(json!({"command": command})),
        Err(err) => upstream_error(err),
    }
}

/// `POST /v1/control/input`.
pub async fn input(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<InputRequest>,
) -> Response {
    if req.text.is_empty() {
        return bad_request(CODE_TEXT_EMPTY, "text must not be empty");
    }
    if req.text.chars().count() > MAX_INPUT_TEXT_LEN {
        return bad_request(
            CODE_TEXT_TOO_LONG,
            format!("text exceeds {MAX_INPUT_TEXT_LEN} characters"),
        );
    }
    if !ENTER_ACTIONS.contains(&req.enter_action.as_str()) {
        return bad_request(
            CODE_BAD_ENTER_ACTION,
            format!("unknown enterAction '{}'", req.enter_action),
        );
    }

    let command = commands::text_input(&req.text);
    if let Err(err) = state.manager.execute_shell(&command).await {
        return upstream_error(err);
    }

    let enter_command = commands::enter_keyevent(&req.enter_action, req.press_enter);
    if let Some(enter) = &enter_command {
        if let Err(err) = state.manager.execute_shell(enter).await {
            return upstream_error(err);
        }
    }

    ok(json!({"command": command, "enterCommand": enter_command}))
}

/// `POST /v1/ui/xml`: uiautomator dump, pulled off the device.
pub async fn ui_xml(State(state): State<Arc<ApiState>>) -> Response {
    let dump_output = match state
        .manager
        .execute_shell(&format!("uiautomator dump {UI_DUMP_PATH}"))
        .await
    {
        Ok(out) => out,
        Err(err) => return upstream_error(err),
    };

    let dumped = match state.manager.pull_file_text(UI_DUMP_PATH).await {
        Ok(text) => text,
        Err(err) => return upstream_error(err),
    };

    let Some(xml) = extract_xml(&dumped) else {
        // The dump ran but produced no XML marker; surface what we saw.
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiEnvelope::error(
                CODE_UNEXPECTED_OUTPUT,
                "uiautomator produced no XML",
                Some(json!({
                    "dumpOutput": preview(&dump_output),
                    "filePreview": preview(&dumped),
                })),
            )),
        )
            .into_response();
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        xml.to_owned(),
    )
        .into_response()
}

/// `POST /v1/ui/screenshot`: raw `screencap -p` stream.
pub async fn screenshot(State(state): State<Arc<ApiState>>) -> Response {
    let png = match state.manager.execute_exec_raw("screencap -p").await {
        Ok(bytes) => bytes,
        Err(err) => return upstream_error(err),
    };

    if png.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiEnvelope::error(
                CODE_ADB_COMMAND_FAILED,
                "screencap produced no output",
                None,
            )),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/png")],
        png,
    )
        .into_response()
}

/// Parses the four-line device probe: brand, model, sdk, `wm size` output.
fn parse_device_probe(output: &str) -> (DeviceInfo, Option<DisplayInfo>) {
    let mut lines = output.lines().map(str::trim);
    let device = DeviceInfo {
        brand: lines.next().unwrap_or_default().to_string(),
        model: lines.next().unwrap_or_default().to_string(),
        sdk: lines.next().unwrap_or_default().to_string(),
    };

    let rest: Vec<&str> = lines.collect();
    let display = commands::parse_wm_size(&rest.join("\n"))
        .map(|(width, height)| DisplayInfo { width, height });
    (device, display)
}

/// Cuts the `<?xml ... </hierarchy>` span out of the pulled dump file.
fn extract_xml(raw: &str) -> Option<&str> {
    let start = raw.find("<?xml")?;
    let end = raw
        .rfind("</hierarchy>")
        .map(|i| i + "</hierarchy>".len())
        .unwrap_or(raw.len());
    Some(raw[start..end].trim_end())
}

fn preview(text: &str) -> String {
    const MAX: usize = 256;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_probe_full() {
        let out = "google\nPixel 9\n35\nPhysical size: 1080x2424\n";
        let (device, display) = parse_device_probe(out);
        assert_eq!(device.brand, "google");
        assert_eq!(device.model, "Pixel 9");
        assert_eq!(device.sdk, "35");
        assert_eq!(
            display,
            Some(DisplayInfo {
                width: 1080,
                height: 2424
            })
        );
    }

    #[test]
    fn parse_device_probe_without_display() {
        let (device, display) = parse_device_probe("brand\nmodel\n33\n");
        assert_eq!(device.sdk, "33");
        assert!(display.is_none());
    }

    #[test]
    fn extract_xml_strips_dump_banner() {
        let raw = "<?xml version='1.0'?><hierarchy rotation=\"0\"><node/></hierarchy>";
        assert_eq!(extract_xml(raw), Some(raw));

        let with_trailer = format!("{raw}\nUI hierchary dumped to: /dev/tty");
        assert_eq!(extract_xml(&with_trailer), Some(raw));
    }

    #[test]
    fn extract_xml_missing_marker() {
        assert!(extract_xml("ERROR: could not get idle state").is_none());
    }

    #[test]
    fn preview_truncates_long_text() {
        let text = "x".repeat(1000);
        let p = preview(&text);
        assert!(p.chars().count() <= 257);
    }
}
