use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::ConnectInfo;
use crate::error::{SignalError, TunnelError};
use crate::identity::PeerIdentity;
use crate::transport::CandidateInit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakePayload {
    Request,
    Offer {
        description: String,
    },
    Answer {
        description: String,
    },
    Candidate {
        candidate: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line_index: Option<u16>,
    },
}

impl HandshakePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            HandshakePayload::Request => "request",
            HandshakePayload::Offer { .. } => "offer",
            HandshakePayload::Answer { .. } => "answer",
            HandshakePayload::Candidate { .. } => "candidate",
        }
    }

    pub fn candidate(init: &CandidateInit) -> Self {
        HandshakePayload::Candidate {
            candidate: init.candidate.clone(),
            mid: init.mid.clone(),
            line_index: init.line_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub sender: PeerIdentity,
    /// `None` addresses whoever listens on the rendezvous key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PeerIdentity>,
    #[serde(flatten)]
    pub payload: HandshakePayload,
}

impl HandshakeMessage {
    pub fn new(sender: PeerIdentity, to: Option<PeerIdentity>, payload: HandshakePayload) -> Self {
        Self { sender, to, payload }
    }

    /// Wraps the message in a relay envelope: the body travels as base64
    /// encoded JSON in the `sdp` field.
    pub fn encode(&self) -> Result<ConnectInfo, SignalError> {
        let json = serde_json::to_vec(self).map_err(|err| SignalError::Encode(err.to_string()))?;
        Ok(ConnectInfo {
            source: self.sender.as_str().to_string(),
            sdp: STANDARD.encode(json),
        })
    }

    pub fn decode(info: &ConnectInfo) -> Result<Self, TunnelError> {
        let raw = STANDARD
            .decode(info.sdp.trim())
            .map_err(|err| TunnelError::MalformedMessage(format!("base64: {err}")))?;
        let message: HandshakeMessage = serde_json::from_slice(&raw)
            .map_err(|err| TunnelError::MalformedMessage(format!("json: {err}")))?;
        if message.sender.as_str() != info.source {
            return Err(TunnelError::MalformedMessage(format!(
                "envelope source {} disagrees with sender {}",
                info.source, message.sender
            )));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_broadcast_without_recipient() {
        let message = HandshakeMessage::new("dialer".into(), None, HandshakePayload::Request);
        let value = serde_json::to_value(&message).expect("json");
        assert_eq!(value, serde_json::json!({"sender": "dialer", "type": "request"}));
    }

    #[test]
    fn candidate_fields_survive_the_envelope() {
        let message = HandshakeMessage::new(
            "listener".into(),
            Some("dialer".into()),
            HandshakePayload::Candidate {
                candidate: "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host".into(),
                mid: Some("0".into()),
                line_index: Some(0),
            },
        );
        let envelope = message.encode().expect("encode");
        assert_eq!(envelope.source, "listener");
        assert_eq!(HandshakeMessage::decode(&envelope).expect("decode"), message);
    }

    #[test]
    fn garbage_body_is_malformed() {
        let envelope = ConnectInfo {
            source: "x".into(),
            sdp: "%%%not-base64%%%".into(),
        };
        assert!(matches!(
            HandshakeMessage::decode(&envelope),
            Err(TunnelError::MalformedMessage(_))
        ));
    }

    #[test]
    fn unknown_type_is_malformed() {
        let envelope = ConnectInfo {
            source: "x".into(),
            sdp: STANDARD.encode(br#"{"sender":"x","type":"bye"}"#),
        };
        assert!(matches!(
            HandshakeMessage::decode(&envelope),
            Err(TunnelError::MalformedMessage(_))
        ));
    }

    #[test]
    fn spoofed_source_is_malformed() {
        let message = HandshakeMessage::new("a".into(), None, HandshakePayload::Request);
        let mut envelope = message.encode().expect("encode");
        envelope.source = "b".into();
        assert!(HandshakeMessage::decode(&envelope).is_err());
    }
}
