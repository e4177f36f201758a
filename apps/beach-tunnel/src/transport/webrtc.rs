use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{
    CandidateInit, ChannelSink, INBOUND_QUEUE_DEPTH, LinkEvent, PeerChannel, PeerConnector, PeerLink,
    PeerSetup,
};
use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::negotiator::Role;

pub const DATA_CHANNEL_LABEL: &str = "beach-tunnel";

fn build_api(setting: SettingEngine) -> Result<API, TunnelError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(TunnelError::transport)?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(TunnelError::transport)?;

    Ok(APIBuilder::new()
        .with_setting_engine(setting)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Creates WebRTC peer connections. The responder owns the data channel;
/// the initiator picks it up through `on_data_channel`.
pub struct WebRtcConnector {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(config: &TunnelConfig) -> Result<Self, TunnelError> {
        Ok(Self {
            api: build_api(SettingEngine::default())?,
            ice_servers: config.ice_servers.clone(),
        })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, role: Role) -> Result<PeerSetup, TunnelError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.rtc_configuration())
                .await
                .map_err(TunnelError::transport)?,
        );
        let (events_tx, events) = mpsc::unbounded_channel();

        let gathered = Arc::new(Mutex::new(Vec::new()));
        let collector = Arc::clone(&gathered);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let collector = Arc::clone(&collector);
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => collector.lock().push(CandidateInit {
                        candidate: init.candidate,
                        mid: init.sdp_mid,
                        line_index: init.sdp_mline_index,
                    }),
                    Err(err) => tracing::warn!(
                        target = "beach_tunnel::webrtc",
                        error = %err,
                        "failed to serialize local ice candidate"
                    ),
                }
            })
        }));

        let state_events = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = state_events.clone();
            Box::pin(async move {
                tracing::debug!(target = "beach_tunnel::webrtc", ?state, "peer connection state changed");
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed
                        | RTCPeerConnectionState::Disconnected
                ) {
                    let _ = events.send(LinkEvent::Closed);
                }
            })
        }));

        match role {
            Role::Responder => {
                let dc_init = RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                };
                let dc = pc
                    .create_data_channel(DATA_CHANNEL_LABEL, Some(dc_init))
                    .await
                    .map_err(TunnelError::transport)?;
                wire_channel(dc, events_tx);
            }
            Role::Initiator => {
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let events = events_tx.clone();
                    Box::pin(async move {
                        tracing::debug!(target = "beach_tunnel::webrtc", label = dc.label(), "remote data channel announced");
                        wire_channel(dc, events);
                    })
                }));
            }
        }

        Ok(PeerSetup {
            link: Box::new(WebRtcLink {
                pc,
                gathered,
                gathering: AsyncMutex::new(None),
            }),
            events,
        })
    }
}

/// Hooks the data channel callbacks up to `LinkEvent::Open` and the inbound
/// byte queue. The queue closes with the channel. A full queue stalls the
/// message callback, which holds back the SCTP reader until the bridge
/// catches up.
fn wire_channel(dc: Arc<RTCDataChannel>, events: mpsc::UnboundedSender<LinkEvent>) {
    let (inbound_tx, inbound_rx) = mpsc::channel::<Bytes>(INBOUND_QUEUE_DEPTH);
    let inbound_tx = Arc::new(Mutex::new(Some(inbound_tx)));
    let pending = Arc::new(Mutex::new(Some(inbound_rx)));

    let tx = Arc::clone(&inbound_tx);
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let sender = tx.lock().clone();
        Box::pin(async move {
            if let Some(sender) = sender {
                let _ = sender.send(msg.data).await;
            }
        })
    }));

    let tx = Arc::clone(&inbound_tx);
    dc.on_close(Box::new(move || {
        tx.lock().take();
        Box::pin(async move {
            tracing::debug!(target = "beach_tunnel::webrtc", "data channel closed");
        })
    }));

    let weak: Weak<RTCDataChannel> = Arc::downgrade(&dc);
    dc.on_open(Box::new(move || {
        let inbound = pending.lock().take();
        let dc = weak.upgrade();
        let events = events.clone();
        Box::pin(async move {
            if let (Some(inbound), Some(dc)) = (inbound, dc) {
                tracing::debug!(target = "beach_tunnel::webrtc", label = dc.label(), "data channel opened");
                let channel = PeerChannel {
                    sink: Arc::new(DataChannelSink { dc }),
                    inbound,
                };
                let _ = events.send(LinkEvent::Open(channel));
            }
        })
    }));
}

struct DataChannelSink {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl ChannelSink for DataChannelSink {
    async fn send(&self, data: Bytes) -> Result<(), TunnelError> {
        self.dc
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|err| TunnelError::Bridge(err.to_string()))
    }

    async fn close(&self) {
        if let Err(err) = self.dc.close().await {
            tracing::debug!(target = "beach_tunnel::webrtc", error = %err, "data channel close failed");
        }
    }
}

struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
    gathered: Arc<Mutex<Vec<CandidateInit>>>,
    gathering: AsyncMutex<Option<mpsc::Receiver<()>>>,
}

impl WebRtcLink {
    async fn apply_local(&self, description: RTCSessionDescription) -> Result<String, TunnelError> {
        let sdp = description.sdp.clone();
        let gather = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(description)
            .await
            .map_err(TunnelError::negotiation)?;
        *self.gathering.lock().await = Some(gather);
        Ok(sdp)
    }
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn create_offer(&self) -> Result<String, TunnelError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(TunnelError::negotiation)?;
        self.apply_local(offer).await
    }

    async fn create_answer(&self, offer: &str) -> Result<String, TunnelError> {
        let remote = RTCSessionDescription::offer(offer.to_string()).map_err(TunnelError::negotiation)?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(TunnelError::negotiation)?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(TunnelError::negotiation)?;
        self.apply_local(answer).await
    }

    async fn set_remote_description(&self, answer: &str) -> Result<(), TunnelError> {
        let remote = RTCSessionDescription::answer(answer.to_string()).map_err(TunnelError::negotiation)?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(TunnelError::negotiation)
    }

    async fn gather_candidates(&self) -> Result<Vec<CandidateInit>, TunnelError> {
        let pending = self.gathering.lock().await.take();
        match pending {
            Some(mut gather) => {
                let _ = gather.recv().await;
            }
            None if self.pc.local_description().await.is_none() => {
                return Err(TunnelError::Negotiation(
                    "gathering requested before a local description".into(),
                ));
            }
            None => {}
        }
        Ok(self.gathered.lock().clone())
    }

    async fn add_candidate(&self, candidate: CandidateInit) -> Result<(), TunnelError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.mid,
            sdp_mline_index: candidate.line_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(TunnelError::negotiation)
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            tracing::debug!(target = "beach_tunnel::webrtc", error = %err, "peer connection close failed");
        }
    }
}
