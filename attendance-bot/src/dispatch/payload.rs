//! Typed inbound payloads from the mini-application
//!
//! The raw text is parsed into JSON first (`Malformed` on failure), then the
//! `type` field selects a typed body. Fields are lenient the way the
//! mini-application sends them: blank strings count as absent and lecture ids
//! may arrive as `lectureId` or `lecture_id`.

use attendance_common::db::Role;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Payload is not valid JSON: {0}")]
    NotJson(#[source] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotObject,

    #[error("Invalid {kind} payload: {source}")]
    InvalidBody {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RegisterBody {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub fio: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QrScanBody {
    #[serde(default, deserialize_with = "lenient_id")]
    pub qr: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GeoStreamBody {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub accuracy: Option<f64>,
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LastGeo {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInBody {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub fio: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub last_geo: Option<LastGeo>,
    #[serde(default, alias = "lecture_id", deserialize_with = "lenient_id")]
    pub lecture_id: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub device: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LectureBody {
    #[serde(default, alias = "lecture_id", deserialize_with = "lenient_id")]
    pub lecture_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetGeoBody {
    #[serde(default, alias = "lecture_id", deserialize_with = "lenient_id")]
    pub lecture_id: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub accuracy: Option<f64>,
    /// Optional; the configured default applies when absent
    #[serde(alias = "radius_m")]
    pub radius: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRoleBody {
    #[serde(default)]
    pub target_user_id: Option<Value>,
    #[serde(default)]
    pub new_role: Option<String>,
}

impl SetRoleBody {
    /// Digits-only string or non-negative integer
    pub fn target_id(&self) -> Option<i64> {
        match self.target_user_id.as_ref()? {
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                s.parse().ok()
            }
            Value::Number(n) => n.as_u64().and_then(|n| i64::try_from(n).ok()),
            _ => None,
        }
    }

    /// One of the closed role set, case-insensitive
    pub fn role(&self) -> Option<Role> {
        self.new_role.as_deref()?.parse().ok()
    }
}

/// Inbound payload dispatched by `type`
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    Register(RegisterBody),
    QrScan(QrScanBody),
    GeoStream(GeoStreamBody),
    CheckIn(CheckInBody),
    OpenLecture(LectureBody),
    CloseLecture(LectureBody),
    SetGeo(SetGeoBody),
    SetRole(SetRoleBody),
    RequestStats(LectureBody),
    /// Unrecognised or missing `type`
    Unknown(String),
}

/// Parsed payload plus the fields kept for diagnostics
#[derive(Debug, Clone)]
pub struct ParsedPayload {
    pub payload: InboundPayload,
    /// Role claimed by the client; logged only, never trusted
    pub declared_role: Option<String>,
    /// The whole JSON object, stored with check-ins
    pub raw: Value,
}

impl InboundPayload {
    pub fn type_name(&self) -> &str {
        match self {
            InboundPayload::Register(_) => "register",
            InboundPayload::QrScan(_) => "qr_scan",
            InboundPayload::GeoStream(_) => "geo_stream",
            InboundPayload::CheckIn(_) => "checkin",
            InboundPayload::OpenLecture(_) => "speaker_open_lecture",
            InboundPayload::CloseLecture(_) => "speaker_close_lecture",
            InboundPayload::SetGeo(_) => "speaker_set_geo",
            InboundPayload::SetRole(_) => "admin_set_role",
            InboundPayload::RequestStats(_) => "admin_request_stats",
            InboundPayload::Unknown(name) => name,
        }
    }

    /// Parse raw mini-application data
    pub fn parse(raw: &str) -> Result<ParsedPayload, PayloadError> {
        let value: Value = serde_json::from_str(raw).map_err(PayloadError::NotJson)?;
        let object = value.as_object().ok_or(PayloadError::NotObject)?;

        let declared_role = object
            .get("role")
            .and_then(Value::as_str)
            .map(|r| r.trim().to_ascii_lowercase())
            .filter(|r| !r.is_empty());
        let type_name = object.get("type").and_then(Value::as_str).unwrap_or_default().to_string();

        let payload = match type_name.as_str() {
            "register" => InboundPayload::Register(body(&value, "register")?),
            "qr_scan" => InboundPayload::QrScan(body(&value, "qr_scan")?),
            "geo_stream" => InboundPayload::GeoStream(body(&value, "geo_stream")?),
            "checkin" => InboundPayload::CheckIn(body(&value, "checkin")?),
            "speaker_open_lecture" => InboundPayload::OpenLecture(body(&value, "speaker_open_lecture")?),
            "speaker_close_lecture" => InboundPayload::CloseLecture(body(&value, "speaker_close_lecture")?),
            "speaker_set_geo" => InboundPayload::SetGeo(body(&value, "speaker_set_geo")?),
            "admin_set_role" => InboundPayload::SetRole(body(&value, "admin_set_role")?),
            "admin_request_stats" => InboundPayload::RequestStats(body(&value, "admin_request_stats")?),
            _ => InboundPayload::Unknown(type_name),
        };

        Ok(ParsedPayload {
            payload,
            declared_role,
            raw: value,
        })
    }
}

fn body<T: for<'de> Deserialize<'de>>(value: &Value, kind: &'static str) -> Result<T, PayloadError> {
    T::deserialize(value).map_err(|source| PayloadError::InvalidBody { kind, source })
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
}

/// Identifier given as a string or a number; blank strings count as absent
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
