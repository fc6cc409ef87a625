use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Candidate payload as it travels over the signaling channel. Field casing
/// follows the candidate-object convention of the remote endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl CandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// The signaling wire message set. Exactly three shapes are recognized;
/// anything else is rejected at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: CandidateInit },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed signaling message: {0}")]
    MalformedMessage(String),
    #[error("unknown signaling message type `{0}`")]
    UnknownMessageType(String),
}

pub fn encode(message: &SignalMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|err| ProtocolError::MalformedMessage(err.to_string()))
}

/// Two-stage decode: the tag decides between "unknown type" and "recognized
/// shape with bad fields" so the two failure modes stay distinguishable.
pub fn decode(payload: &str) -> Result<SignalMessage, ProtocolError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|err| ProtocolError::MalformedMessage(err.to_string()))?;
    let tag = match value.get("type").and_then(Value::as_str) {
        Some(tag) => tag.to_string(),
        None => {
            return Err(ProtocolError::MalformedMessage(
                "missing `type` tag".to_string(),
            ));
        }
    };
    match tag.as_str() {
        "offer" | "answer" | "candidate" => serde_json::from_value(value)
            .map_err(|err| ProtocolError::MalformedMessage(err.to_string())),
        _ => Err(ProtocolError::UnknownMessageType(tag)),
    }
}
