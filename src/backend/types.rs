//! Explicit response shapes for every backend capability.
//!
//! Responses are decoded from `serde_json::Value` into these types and
//! rejected with [`BackendError::Malformed`] when a required field is missing
//! or has the wrong type, rather than guessed at.

use serde::{Deserialize, Serialize};

use super::BackendError;
use crate::session::{Context, Message, Thread, ThreadId, UserId};

// ---------------------------------------------------------------------------
// Result shapes
// ---------------------------------------------------------------------------

/// Image classification result.  Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted class, e.g. `"Wheat black rust"`.
    #[serde(rename = "disease")]
    pub label: String,
    /// Markdown write-up of the predicted class.
    #[serde(rename = "response", default)]
    pub details: String,
}

/// Most recent externally generated report for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub context: Context,
    /// Generation timestamp as sent by the backend, if any.
    pub date: Option<String>,
}

/// Transcription of an uploaded audio clip.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Transcription {
    #[serde(rename = "transcription")]
    pub text: String,
    #[serde(default)]
    pub detected_language: Option<String>,
    #[serde(default)]
    pub language_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Request shapes
// ---------------------------------------------------------------------------

/// Body of the reset call: the conversation being archived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetRequest {
    pub user_id: UserId,
    pub messages: Vec<Message>,
    pub context: Context,
}

#[derive(Debug, Serialize)]
pub(crate) struct ContextBody<'a> {
    pub context: &'a Context,
}

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// Thread identifiers arrive either as plain strings or as extended-JSON
/// object ids.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordId {
    Plain(String),
    Oid {
        #[serde(rename = "$oid")]
        oid: String,
    },
}

#[derive(Debug, Deserialize)]
struct ThreadRecord {
    #[serde(rename = "_id")]
    id: RecordId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    context: Option<Context>,
}

impl TryFrom<ThreadRecord> for Thread {
    type Error = BackendError;

    fn try_from(record: ThreadRecord) -> Result<Self, Self::Error> {
        let id = match record.id {
            RecordId::Plain(id) | RecordId::Oid { oid: id } => id,
        };
        let id = id.trim().to_string();
        if id.is_empty() {
            return Err(BackendError::Malformed("thread with empty _id".into()));
        }
        let display_name = record
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| id.clone());

        Ok(Thread {
            id: ThreadId::new(id),
            display_name,
            messages: record.messages,
            context: record.context.unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Decoders
// ---------------------------------------------------------------------------

fn malformed(what: &str, err: serde_json::Error) -> BackendError {
    BackendError::Malformed(format!("{what}: {err}"))
}

/// Decode a full roster listing.  Any bad entry rejects the whole listing.
pub fn decode_roster(value: serde_json::Value) -> Result<Vec<Thread>, BackendError> {
    if !value.is_array() {
        return Err(BackendError::Malformed("thread listing is not an array".into()));
    }
    let records: Vec<ThreadRecord> =
        serde_json::from_value(value).map_err(|e| malformed("thread listing", e))?;
    records.into_iter().map(Thread::try_from).collect()
}

/// Decode a single thread record.
pub fn decode_thread(value: serde_json::Value) -> Result<Thread, BackendError> {
    let record: ThreadRecord =
        serde_json::from_value(value).map_err(|e| malformed("thread record", e))?;
    Thread::try_from(record)
}

/// Decode the latest-report response.
///
/// `null`, or an object whose `report` is missing or empty, means "no
/// report".  A `report` that is not a string is malformed.
pub fn decode_report(value: serde_json::Value) -> Result<Option<Report>, BackendError> {
    let obj = match value {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Object(obj) => obj,
        other => {
            return Err(BackendError::Malformed(format!(
                "report response is not an object: {other}"
            )))
        }
    };

    let context = match obj.get("report") {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(s)) if s.is_empty() => return Ok(None),
        Some(serde_json::Value::String(s)) => Context::new(s.clone()),
        Some(other) => {
            return Err(BackendError::Malformed(format!(
                "report field is not a string: {other}"
            )))
        }
    };

    let date = obj.get("date").and_then(|d| match d {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    });

    Ok(Some(Report { context, date }))
}

/// Decode a transcription result; the text is trimmed.
pub fn decode_transcription(value: serde_json::Value) -> Result<Transcription, BackendError> {
    let mut t: Transcription =
        serde_json::from_value(value).map_err(|e| malformed("transcription", e))?;
    t.text = t.text.trim().to_string();
    Ok(t)
}

/// Decode an image classification result.
pub fn decode_prediction(value: serde_json::Value) -> Result<Prediction, BackendError> {
    let p: Prediction = serde_json::from_value(value).map_err(|e| malformed("prediction", e))?;
    if p.label.trim().is_empty() {
        return Err(BackendError::Malformed("prediction with empty label".into()));
    }
    Ok(p)
}

/// Pull a required string field out of a JSON object.
pub fn decode_text_field(value: &serde_json::Value, field: &str) -> Result<String, BackendError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| BackendError::Malformed(format!("missing string field `{field}`")))
}

/// Human-readable message out of an error body (`{"error": …}` or
/// `{"detail": …}`), falling back to the raw body.
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => json
            .get("error")
            .or_else(|| json.get("detail"))
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.trim().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
