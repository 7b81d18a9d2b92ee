//! Wire envelope for ring protocol messages.
//!
//! Every message is a JSON object `{"action": "...", "payload": {...}}` sent as
//! a WebSocket text frame. Each action has its own typed payload record,
//! validated when the frame is parsed. Input that is not valid JSON, names an
//! unknown action, or carries an incomplete payload never becomes an
//! [`Envelope`]: [`Envelope::parse`] reports why, and [`Envelope::from_json`]
//! yields `None` (the action-less message) for the receiver to log and drop.

use crate::identity::{NodeId, as_opt_string, as_string};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// The closed set of protocol actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Hello,
    Healthy,
    Report,
    Fail,
    Election,
    Elected,
    Reconnect,
    Leaving,
    Timestamp,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::Hello,
        Action::Healthy,
        Action::Report,
        Action::Fail,
        Action::Election,
        Action::Elected,
        Action::Reconnect,
        Action::Leaving,
        Action::Timestamp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Hello => "HELLO",
            Action::Healthy => "HEALTHY",
            Action::Report => "REPORT",
            Action::Fail => "FAIL",
            Action::Election => "ELECTION",
            Action::Elected => "ELECTED",
            Action::Reconnect => "RECONNECT",
            Action::Leaving => "LEAVING",
            Action::Timestamp => "TIMESTAMP",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownAction(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("Envelope has no action")]
    MissingAction,
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Invalid {action} payload: {source}")]
    InvalidPayload {
        action: Action,
        #[source]
        source: serde_json::Error,
    },
}

/// Sent by a node right after it dials its successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    #[serde(with = "as_string")]
    pub from_id: NodeId,
    /// Set by the leader: the receiver is the leader's immediate successor.
    #[serde(default)]
    pub watch_me: bool,
    /// Set when the sender is rejoining after a sign-out.
    #[serde(default)]
    pub reconnect: bool,
}

/// Health probe travelling the ring back to the leader that sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthyPayload {
    #[serde(with = "as_string")]
    pub for_id: NodeId,
    #[serde(with = "as_string")]
    pub from_id: NodeId,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hops: u32,
}

/// Membership collection round. Each node appends itself to `slaves`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    #[serde(with = "as_string")]
    pub from_id: NodeId,
    #[serde(with = "as_string")]
    pub for_id: NodeId,
    #[serde(default, with = "as_opt_string", skip_serializing_if = "Option::is_none")]
    pub leader_id: Option<NodeId>,
    #[serde(default)]
    pub slaves: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hops: u32,
}

/// A neighbor failure was observed by `origin_node`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailPayload {
    #[serde(with = "as_string")]
    pub from_id: NodeId,
    pub origin_node: NodeId,
    #[serde(default)]
    pub reconnect: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionPayload {
    pub to_be_elected_id: NodeId,
    #[serde(with = "as_string")]
    pub from_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectedPayload {
    #[serde(with = "as_string")]
    pub new_leader_id: NodeId,
    #[serde(default)]
    pub watch_me: bool,
    #[serde(with = "as_string")]
    pub from_id: NodeId,
}

/// `reconnected_node` rejoined in front of `origin_node_id`; whoever still
/// points at `origin_node_id` must point at `reconnected_node` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPayload {
    #[serde(with = "as_string")]
    pub from_id: NodeId,
    #[serde(with = "as_string")]
    pub origin_node_id: NodeId,
    pub reconnected_node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeavingPayload {
    #[serde(with = "as_string")]
    pub from_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampPayload {
    pub time_stamp: u64,
    #[serde(with = "as_string")]
    pub for_id: NodeId,
    #[serde(with = "as_string")]
    pub from_id: NodeId,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hops: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope {
    Hello(HelloPayload),
    Healthy(HealthyPayload),
    Report(ReportPayload),
    Fail(FailPayload),
    Election(ElectionPayload),
    Elected(ElectedPayload),
    Reconnect(ReconnectPayload),
    Leaving(LeavingPayload),
    Timestamp(TimestampPayload),
}

/// Untyped first pass over incoming frames.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Envelope {
    pub fn action(&self) -> Action {
        match self {
            Envelope::Hello(_) => Action::Hello,
            Envelope::Healthy(_) => Action::Healthy,
            Envelope::Report(_) => Action::Report,
            Envelope::Fail(_) => Action::Fail,
            Envelope::Election(_) => Action::Election,
            Envelope::Elected(_) => Action::Elected,
            Envelope::Reconnect(_) => Action::Reconnect,
            Envelope::Leaving(_) => Action::Leaving,
            Envelope::Timestamp(_) => Action::Timestamp,
        }
    }

    /// The node that last handled this message.
    pub fn from_id(&self) -> &NodeId {
        match self {
            Envelope::Hello(p) => &p.from_id,
            Envelope::Healthy(p) => &p.from_id,
            Envelope::Report(p) => &p.from_id,
            Envelope::Fail(p) => &p.from_id,
            Envelope::Election(p) => &p.from_id,
            Envelope::Elected(p) => &p.from_id,
            Envelope::Reconnect(p) => &p.from_id,
            Envelope::Leaving(p) => &p.from_id,
            Envelope::Timestamp(p) => &p.from_id,
        }
    }

    /// Overwrite the sender field before forwarding.
    pub fn stamp_sender(&mut self, id: &NodeId) {
        let from_id = match self {
            Envelope::Hello(p) => &mut p.from_id,
            Envelope::Healthy(p) => &mut p.from_id,
            Envelope::Report(p) => &mut p.from_id,
            Envelope::Fail(p) => &mut p.from_id,
            Envelope::Election(p) => &mut p.from_id,
            Envelope::Elected(p) => &mut p.from_id,
            Envelope::Reconnect(p) => &mut p.from_id,
            Envelope::Leaving(p) => &mut p.from_id,
            Envelope::Timestamp(p) => &mut p.from_id,
        };
        *from_id = id.clone();
    }

    /// Forwarding count of the messages that circle back to their origin.
    ///
    /// `None` for actions that are not relayed round the whole ring.
    pub fn hops_mut(&mut self) -> Option<&mut u32> {
        match self {
            Envelope::Healthy(p) => Some(&mut p.hops),
            Envelope::Report(p) => Some(&mut p.hops),
            Envelope::Timestamp(p) => Some(&mut p.hops),
            _ => None,
        }
    }

    /// Serialize to the JSON text sent over the wire.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("Envelope serialization should not fail")
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Vec<u8> {
        self.to_text().into_bytes()
    }

    /// Parse a wire frame, reporting why it was rejected.
    pub fn parse(data: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_slice(data).map_err(EnvelopeError::Malformed)?;
        let action: Action = match raw.action {
            Some(action) if !action.is_empty() => action.parse()?,
            _ => return Err(EnvelopeError::MissingAction),
        };

        fn payload<T: serde::de::DeserializeOwned>(
            action: Action,
            value: serde_json::Value,
        ) -> Result<T, EnvelopeError> {
            serde_json::from_value(value)
                .map_err(|source| EnvelopeError::InvalidPayload { action, source })
        }

        let value = raw.payload;
        Ok(match action {
            Action::Hello => Envelope::Hello(payload(action, value)?),
            Action::Healthy => Envelope::Healthy(payload(action, value)?),
            Action::Report => Envelope::Report(payload(action, value)?),
            Action::Fail => Envelope::Fail(payload(action, value)?),
            Action::Election => Envelope::Election(payload(action, value)?),
            Action::Elected => Envelope::Elected(payload(action, value)?),
            Action::Reconnect => Envelope::Reconnect(payload(action, value)?),
            Action::Leaving => Envelope::Leaving(payload(action, value)?),
            Action::Timestamp => Envelope::Timestamp(payload(action, value)?),
        })
    }

    /// Try to parse a wire frame.
    ///
    /// Returns `None` for anything that is not a complete, known envelope.
    pub fn from_json(data: &[u8]) -> Option<Self> {
        Self::parse(data).ok()
    }
}
