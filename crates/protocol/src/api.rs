use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error code families
// ---------------------------------------------------------------------------
//
// 0      success
// 400xx  request validation failures (HTTP 400)
// 500xx  unexpected upstream output (HTTP 500)
// 503xx  ADB / device failures (HTTP 503)

pub const CODE_OK: i32 = 0;
pub const CODE_NEGATIVE_COORDINATE: i32 = 40002;
pub const CODE_TEXT_EMPTY: i32 = 40032;
pub const CODE_TEXT_TOO_LONG: i32 = 40033;
pub const CODE_BAD_ENTER_ACTION: i32 = 40035;
pub const CODE_UNEXPECTED_OUTPUT: i32 = 50001;
pub const CODE_ADB_UNAVAILABLE: i32 = 50301;
pub const CODE_ADB_COMMAND_FAILED: i32 = 50302;
pub const CODE_ADB_BUSY: i32 = 50303;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// `POST /v1/control/click` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickRequest {
    pub x: i32,
    pub y: i32,
}

/// `POST /v1/control/swipe` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeRequest {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
    #[serde(default = "default_swipe_duration")]
    pub duration_ms: i64,
}

fn default_swipe_duration() -> i64 {
    300
}

/// `POST /v1/control/input` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRequest {
    pub text: String,
    #[serde(default)]
    pub press_enter: bool,
    #[serde(default = "default_enter_action")]
    pub enter_action: String,
}

fn default_enter_action() -> String {
    "none".into()
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// JSON envelope every `/v1` route answers with (binary routes excepted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiEnvelope {
    /// Success envelope with a payload.
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            code: CODE_OK,
            message: "ok".into(),
            data: Some(data),
        }
    }

    /// Error envelope; `data` carries optional diagnostics.
    pub fn error(code: i32, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }
}

/// Inclusive coordinate bounds reported by `/v1/system/info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickRange {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl ClickRange {
    /// Range covering a display of `width` x `height` pixels.
    pub fn for_display(width: u32, height: u32) -> Self {
        Self {
            x_min: 0,
            y_min: 0,
            x_max: width.saturating_sub(1) as i32,
            y_max: height.saturating_sub(1) as i32,
        }
    }
}

/// Device block of `/v1/system/info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub brand: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sdk: String,
}

/// Display block of `/v1/system/info`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub width: u32,
    pub height: u32,
}
