//! Prediction inputs and the container's wire format

use crate::error::{PredictError, PredictResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputValue {
    Text(String),
    /// Sent inline as a base64 `data:` URL
    File(PathBuf),
}

/// Named prediction inputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inputs {
    values: BTreeMap<String, InputValue>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: InputValue) {
        self.values.insert(key.into(), value);
    }

    pub fn text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, InputValue::Text(value.into()));
        self
    }

    pub fn file(mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.insert(key, InputValue::File(path.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&InputValue> {
        self.values.get(key)
    }

    /// Parse `key=value` or `key=@path` arguments. Later keys replace earlier ones.
    pub fn parse<I, S>(args: I) -> PredictResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inputs = Self::new();
        for arg in args {
            let arg = arg.as_ref();
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                PredictError::Input(format!("expected key=value, got '{}'", arg))
            })?;
            if key.is_empty() {
                return Err(PredictError::Input(format!("missing key in '{}'", arg)));
            }
            let value = match value.strip_prefix('@') {
                Some(path) => InputValue::File(PathBuf::from(path)),
                None => InputValue::Text(value.to_string()),
            };
            inputs.insert(key, value);
        }
        Ok(inputs)
    }

    /// Flatten to the key→string map the container expects, reading files
    pub async fn to_wire(&self) -> PredictResult<BTreeMap<String, String>> {
        let mut wire = BTreeMap::new();
        for (key, value) in &self.values {
            let encoded = match value {
                InputValue::Text(text) => text.clone(),
                InputValue::File(path) => {
                    let bytes = tokio::fs::read(path).await.map_err(|e| {
                        PredictError::Input(format!("failed to read {}: {}", path.display(), e))
                    })?;
                    data_url(path, &bytes)
                }
            };
            wire.insert(key.clone(), encoded);
        }
        Ok(wire)
    }
}

fn data_url(path: &Path, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type(path), STANDARD.encode(bytes))
}

fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionRequest {
    pub input: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Starting,
    Processing,
    #[serde(alias = "succeeded")]
    Success,
    Failed,
}

/// Body of a 200 response from `/predictions`
#[derive(Debug, Clone, Deserialize)]
struct PredictionResponse {
    status: Status,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BadRequestBody {
    #[serde(default)]
    message: Option<String>,
}

/// Decoded prediction result
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    Success { output: Value },
    Failure { message: String },
    Pending { status: Status },
    BadRequest { message: Option<String> },
}

impl PredictionOutcome {
    /// Classify a `/predictions` response
    pub fn decode(status: u16, body: &[u8]) -> PredictResult<Self> {
        match status {
            200 => {
                let response: PredictionResponse = serde_json::from_slice(body)
                    .map_err(|e| PredictError::Decode(e.to_string()))?;
                Ok(match response.status {
                    Status::Success => Self::Success {
                        output: response.output.unwrap_or(Value::Null),
                    },
                    Status::Failed => Self::Failure {
                        message: response.error.unwrap_or_default(),
                    },
                    pending => Self::Pending { status: pending },
                })
            }
            400 => {
                let body: BadRequestBody = serde_json::from_slice(body).unwrap_or_default();
                Ok(Self::BadRequest {
                    message: body.message.filter(|m| !m.is_empty()),
                })
            }
            other => Err(PredictError::Protocol { status: other }),
        }
    }
}
