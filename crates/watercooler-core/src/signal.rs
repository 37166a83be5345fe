//! Signaling wire messages
//!
//! Every frame on the signaling channel is a JSON object of the form
//! `{"type": <name>, "payload": {...}}`. Relay messages sent by a client name
//! their recipient in `target`; the server rewrites that to the sender's
//! `userId` before delivery.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ParticipantId, Position, StateSnapshot};

// ----------------------------------------------------------------------------
// Signal Kinds
// ----------------------------------------------------------------------------

/// Message types carried by the signaling channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalKind {
    HelloClient,
    MaxUsersReached,
    UserJoined,
    UserLeft,
    IceCandidate,
    ConnectionOffer,
    ConnectionAnswer,
    StateUpdate,
}

impl SignalKind {
    pub const ALL: [SignalKind; 8] = [
        SignalKind::HelloClient,
        SignalKind::MaxUsersReached,
        SignalKind::UserJoined,
        SignalKind::UserLeft,
        SignalKind::IceCandidate,
        SignalKind::ConnectionOffer,
        SignalKind::ConnectionAnswer,
        SignalKind::StateUpdate,
    ];

    /// Wire name of this message type
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::HelloClient => "hello-client",
            SignalKind::MaxUsersReached => "max-users-reached",
            SignalKind::UserJoined => "user-joined",
            SignalKind::UserLeft => "user-left",
            SignalKind::IceCandidate => "ice-candidate",
            SignalKind::ConnectionOffer => "connection-offer",
            SignalKind::ConnectionAnswer => "connection-answer",
            SignalKind::StateUpdate => "state-update",
        }
    }

    /// Look up a wire name, accepting the older state update names
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "position-update" | "movement-update" => Some(SignalKind::StateUpdate),
            other => Self::ALL.iter().copied().find(|k| k.as_str() == other),
        }
    }
}

impl core::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Negotiation Artifacts
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description in the browser JSON shape `{type, sdp}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer<T: Into<String>>(sdp: T) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer<T: Into<String>>(sdp: T) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new<T: Into<String>>(candidate: T) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }
}

// ----------------------------------------------------------------------------
// State Updates
// ----------------------------------------------------------------------------

/// Wire form of a state broadcast; every field but the sender may be omitted
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_enabled: Option<bool>,
}

impl StateUpdate {
    /// Full-profile update carrying every field of `snapshot`
    pub fn from_snapshot(user_id: Option<ParticipantId>, snapshot: &StateSnapshot) -> Self {
        Self {
            user_id,
            position: Some(snapshot.position),
            angle: Some(snapshot.angle),
            speed: Some(snapshot.speed),
            video_enabled: Some(snapshot.video_enabled),
            audio_enabled: Some(snapshot.audio_enabled),
        }
    }

    /// Apply this update over the previously known state.
    ///
    /// Omitted fields keep their previous value, or the default if there is none.
    pub fn apply_to(&self, previous: Option<StateSnapshot>) -> StateSnapshot {
        let base = previous.unwrap_or_default();
        StateSnapshot {
            position: self.position.unwrap_or(base.position),
            angle: self.angle.unwrap_or(base.angle),
            speed: self.speed.unwrap_or(base.speed),
            audio_enabled: self.audio_enabled.unwrap_or(base.audio_enabled),
            video_enabled: self.video_enabled.unwrap_or(base.video_enabled),
        }
    }
}

// ----------------------------------------------------------------------------
// Typed Signals
// ----------------------------------------------------------------------------

/// Messages delivered to a client
#[derive(Debug, Clone, PartialEq)]
pub enum InboundSignal {
    Hello {
        id: ParticipantId,
        user_ids: Vec<ParticipantId>,
    },
    MaxUsersReached,
    UserJoined {
        user_id: ParticipantId,
    },
    UserLeft {
        user_id: ParticipantId,
    },
    IceCandidate {
        user_id: ParticipantId,
        candidate: IceCandidate,
    },
    Offer {
        user_id: ParticipantId,
        offer: SessionDescription,
    },
    Answer {
        user_id: ParticipantId,
        answer: SessionDescription,
    },
    StateUpdate(StateUpdate),
}

/// Messages sent by a client
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundSignal {
    IceCandidate {
        target: ParticipantId,
        candidate: IceCandidate,
    },
    Offer {
        target: ParticipantId,
        offer: SessionDescription,
    },
    Answer {
        target: ParticipantId,
        answer: SessionDescription,
    },
    StateUpdate(StateUpdate),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HelloPayload {
    id: ParticipantId,
    #[serde(default)]
    user_ids: Vec<ParticipantId>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserPayload {
    user_id: ParticipantId,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePayload {
    #[serde(alias = "target")]
    user_id: ParticipantId,
    candidate: IceCandidate,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferPayload {
    #[serde(alias = "target")]
    user_id: ParticipantId,
    offer: SessionDescription,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerPayload {
    #[serde(alias = "target")]
    user_id: ParticipantId,
    answer: SessionDescription,
}

#[derive(Serialize, Deserialize)]
struct TargetedCandidate {
    target: ParticipantId,
    candidate: IceCandidate,
}

#[derive(Serialize, Deserialize)]
struct TargetedOffer {
    target: ParticipantId,
    offer: SessionDescription,
}

#[derive(Serialize, Deserialize)]
struct TargetedAnswer {
    target: ParticipantId,
    answer: SessionDescription,
}

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(payload)
}

fn encode<T: Serialize>(payload: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(payload)
}

impl InboundSignal {
    pub fn kind(&self) -> SignalKind {
        match self {
            InboundSignal::Hello { .. } => SignalKind::HelloClient,
            InboundSignal::MaxUsersReached => SignalKind::MaxUsersReached,
            InboundSignal::UserJoined { .. } => SignalKind::UserJoined,
            InboundSignal::UserLeft { .. } => SignalKind::UserLeft,
            InboundSignal::IceCandidate { .. } => SignalKind::IceCandidate,
            InboundSignal::Offer { .. } => SignalKind::ConnectionOffer,
            InboundSignal::Answer { .. } => SignalKind::ConnectionAnswer,
            InboundSignal::StateUpdate(_) => SignalKind::StateUpdate,
        }
    }

    /// Decode the payload of a frame whose type is `kind`
    pub fn from_payload(kind: SignalKind, payload: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            SignalKind::HelloClient => {
                let p: HelloPayload = decode(payload)?;
                InboundSignal::Hello {
                    id: p.id,
                    user_ids: p.user_ids,
                }
            }
            SignalKind::MaxUsersReached => InboundSignal::MaxUsersReached,
            SignalKind::UserJoined => {
                let p: UserPayload = decode(payload)?;
                InboundSignal::UserJoined { user_id: p.user_id }
            }
            SignalKind::UserLeft => {
                let p: UserPayload = decode(payload)?;
                InboundSignal::UserLeft { user_id: p.user_id }
            }
            SignalKind::IceCandidate => {
                let p: CandidatePayload = decode(payload)?;
                InboundSignal::IceCandidate {
                    user_id: p.user_id,
                    candidate: p.candidate,
                }
            }
            SignalKind::ConnectionOffer => {
                let p: OfferPayload = decode(payload)?;
                InboundSignal::Offer {
                    user_id: p.user_id,
                    offer: p.offer,
                }
            }
            SignalKind::ConnectionAnswer => {
                let p: AnswerPayload = decode(payload)?;
                InboundSignal::Answer {
                    user_id: p.user_id,
                    answer: p.answer,
                }
            }
            SignalKind::StateUpdate => InboundSignal::StateUpdate(decode(payload)?),
        })
    }

    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        let payload = match self {
            InboundSignal::Hello { id, user_ids } => encode(&HelloPayload {
                id: id.clone(),
                user_ids: user_ids.clone(),
            })?,
            InboundSignal::MaxUsersReached => Value::Null,
            InboundSignal::UserJoined { user_id } | InboundSignal::UserLeft { user_id } => {
                encode(&UserPayload {
                    user_id: user_id.clone(),
                })?
            }
            InboundSignal::IceCandidate { user_id, candidate } => encode(&CandidatePayload {
                user_id: user_id.clone(),
                candidate: candidate.clone(),
            })?,
            InboundSignal::Offer { user_id, offer } => encode(&OfferPayload {
                user_id: user_id.clone(),
                offer: offer.clone(),
            })?,
            InboundSignal::Answer { user_id, answer } => encode(&AnswerPayload {
                user_id: user_id.clone(),
                answer: answer.clone(),
            })?,
            InboundSignal::StateUpdate(update) => encode(update)?,
        };
        Ok(Frame::new(self.kind(), payload))
    }
}

impl OutboundSignal {
    pub fn kind(&self) -> SignalKind {
        match self {
            OutboundSignal::IceCandidate { .. } => SignalKind::IceCandidate,
            OutboundSignal::Offer { .. } => SignalKind::ConnectionOffer,
            OutboundSignal::Answer { .. } => SignalKind::ConnectionAnswer,
            OutboundSignal::StateUpdate(_) => SignalKind::StateUpdate,
        }
    }

    /// Recipient of a relay message; `None` for broadcasts
    pub fn target(&self) -> Option<&ParticipantId> {
        match self {
            OutboundSignal::IceCandidate { target, .. }
            | OutboundSignal::Offer { target, .. }
            | OutboundSignal::Answer { target, .. } => Some(target),
            OutboundSignal::StateUpdate(_) => None,
        }
    }

    /// Decode a client frame, as a rendezvous server would
    pub fn from_payload(kind: SignalKind, payload: Value) -> Result<Option<Self>, serde_json::Error> {
        Ok(Some(match kind {
            SignalKind::IceCandidate => {
                let p: TargetedCandidate = decode(payload)?;
                OutboundSignal::IceCandidate {
                    target: p.target,
                    candidate: p.candidate,
                }
            }
            SignalKind::ConnectionOffer => {
                let p: TargetedOffer = decode(payload)?;
                OutboundSignal::Offer {
                    target: p.target,
                    offer: p.offer,
                }
            }
            SignalKind::ConnectionAnswer => {
                let p: TargetedAnswer = decode(payload)?;
                OutboundSignal::Answer {
                    target: p.target,
                    answer: p.answer,
                }
            }
            SignalKind::StateUpdate => OutboundSignal::StateUpdate(decode(payload)?),
            _ => return Ok(None),
        }))
    }

    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        let payload = match self {
            OutboundSignal::IceCandidate { target, candidate } => encode(&TargetedCandidate {
                target: target.clone(),
                candidate: candidate.clone(),
            })?,
            OutboundSignal::Offer { target, offer } => encode(&TargetedOffer {
                target: target.clone(),
                offer: offer.clone(),
            })?,
            OutboundSignal::Answer { target, answer } => encode(&TargetedAnswer {
                target: target.clone(),
                answer: answer.clone(),
            })?,
            OutboundSignal::StateUpdate(update) => encode(update)?,
        };
        Ok(Frame::new(self.kind(), payload))
    }
}

// ----------------------------------------------------------------------------
// Frames
// ----------------------------------------------------------------------------

/// Untyped signaling envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Frame {
    pub fn new(kind: SignalKind, payload: Value) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            payload,
        }
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Known message type of this frame, if any
    pub fn signal_kind(&self) -> Option<SignalKind> {
        SignalKind::from_name(&self.kind)
    }
}
