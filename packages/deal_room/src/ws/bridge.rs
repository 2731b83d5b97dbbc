//! Reconnecting realtime link.
//!
//! One bridge task owns the socket for the life of a session. The outer loop
//! connects, joins every room, and hands off to the joined select loop; when
//! the link drops it marks in-flight sends failed and retries with capped,
//! jittered exponential backoff. Frames never touch the trackers from here —
//! they go through [`dispatch_frame`] so ordering is preserved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use job_flow::JobAction;

use crate::backend::Backend;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{LinkState, SessionEvent};
use crate::models::DeliveryStatus;
use crate::presence::SnapshotGate;

use super::dispatch::{DispatchOutcome, SessionShared, dispatch_frame};
use super::protocol::{ClientCommand, ServerFrame, parse_frame};

/// Commands queued by the coordinator for the bridge to put on the wire.
#[derive(Debug)]
pub(crate) enum OutboundCommand {
    Chat {
        room_id: String,
        uuid: String,
        content: String,
    },
    Workflow {
        room_id: String,
        uuid: String,
        workflow_id: String,
        seq_number: u64,
        action: JobAction,
    },
}

/// What the bridge remembers about a frame it sent and has not seen acked.
struct InFlight {
    kind: InFlightKind,
    deadline: Instant,
}

enum InFlightKind {
    /// An unacked join keeps the whole link provisional: if it times out
    /// the connection is torn down, not just one message.
    Join { room_id: String },
    Chat { room_id: String },
    Workflow { room_id: String, action: JobAction },
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

enum JoinedExit {
    LinkLost,
    Cancelled,
}

/// Exponential backoff for reconnect attempt `attempt` (0-based).
fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

/// Randomize a delay into `[d/2, d]` so reconnecting clients spread out.
fn jittered(d: Duration) -> Duration {
    let ms = d.as_millis() as u64;
    if ms < 2 {
        return d;
    }
    Duration::from_millis(rand::rng().random_range(ms / 2..=ms))
}

/// Drive the link until cancelled. Never returns an error: connection
/// failures are a normal state surfaced through [`LinkState`].
pub(crate) async fn run_bridge<B: Backend>(
    shared: Arc<SessionShared>,
    backend: Arc<B>,
    config: SessionConfig,
    mut outbound: mpsc::Receiver<OutboundCommand>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    let mut snapshot_gate = SnapshotGate::new(config.snapshot_min_interval());
    let mut ever_joined = false;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        shared.set_link(LinkState::Connecting);

        match tokio_tungstenite::connect_async(&config.realtime_url).await {
            Ok((stream, _)) => {
                attempt = 0;
                info!(url = %config.realtime_url, "realtime link established");
                let exit = run_joined(
                    &shared,
                    backend.as_ref(),
                    &config,
                    stream,
                    &mut outbound,
                    &cancel,
                    &mut snapshot_gate,
                    ever_joined,
                )
                .await;
                ever_joined = true;
                if matches!(exit, JoinedExit::Cancelled) {
                    break;
                }
                info!("realtime link lost, reconnecting");
            }
            Err(err) => {
                warn!(%err, attempt, "realtime connect failed");
            }
        }

        shared.set_link(LinkState::Disconnected);
        let delay = jittered(backoff_delay(
            attempt,
            config.backoff_base(),
            config.backoff_cap(),
        ));
        attempt = attempt.saturating_add(1);
        debug!(delay_ms = delay.as_millis() as u64, "backing off");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_link(LinkState::Disconnected);
    debug!("bridge task stopped");
}

#[allow(clippy::too_many_arguments)]
async fn run_joined<B: Backend>(
    shared: &SessionShared,
    backend: &B,
    config: &SessionConfig,
    stream: WsStream,
    outbound: &mut mpsc::Receiver<OutboundCommand>,
    cancel: &CancellationToken,
    snapshot_gate: &mut SnapshotGate,
    rejoin: bool,
) -> JoinedExit {
    let (mut sink, mut source) = stream.split();
    let mut in_flight: HashMap<String, InFlight> = HashMap::new();

    // Join every room, asking for replay past what we already hold. Joins
    // are ack-gated like sends: one timing out takes the link down rather
    // than leaving a room silently unsubscribed.
    for room_id in shared.rooms.keys() {
        let last_seq = shared.store.max_server_seq(room_id).await;
        let uuid = Uuid::new_v4().to_string();
        in_flight.insert(
            uuid.clone(),
            InFlight {
                kind: InFlightKind::Join {
                    room_id: room_id.clone(),
                },
                deadline: Instant::now() + config.ack_timeout(),
            },
        );
        let join = ClientCommand::Join {
            uuid,
            room_id: room_id.clone(),
            last_seq,
        };
        if let Err(err) = send_command(&mut sink, &join).await {
            warn!(room = %room_id, %err, "join send failed");
            return JoinedExit::LinkLost;
        }
    }
    shared.set_link(LinkState::Joined);

    // Presence diffs missed while offline are unrecoverable; refetch a
    // snapshot, rate-limited so flapping links do not hammer the backend.
    if snapshot_gate.try_acquire() {
        let peers = shared.participant_ids();
        match backend.presence_snapshot(&peers).await {
            Ok(items) => {
                shared.presence.apply_snapshot(items).await;
                shared.emit(SessionEvent::PresenceChanged { user_ids: peers });
            }
            Err(err) => warn!(%err, "presence snapshot refresh failed"),
        }
    }

    // Workflow events missed while offline would otherwise show up as a
    // sequence gap on the next transition; resync eagerly on rejoin.
    if rejoin {
        for stale in shared.workflows.snapshots().await {
            match backend.fetch_workflow(&stale.workflow_id).await {
                Ok(fresh) => {
                    if shared.workflows.resync(&fresh).await {
                        shared.emit(SessionEvent::WorkflowResynced(fresh));
                    }
                }
                Err(err) => {
                    warn!(workflow = %stale.workflow_id, %err, "workflow resync failed")
                }
            }
        }
    }

    let mut sweep = tokio::time::interval(Duration::from_secs(1));
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let exit = loop {
        tokio::select! {
            _ = cancel.cancelled() => break JoinedExit::Cancelled,

            inbound = source.next() => {
                match inbound {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        let frame = match parse_frame(&text) {
                            Ok(frame) => frame,
                            Err(err) => {
                                warn!(%err, "dropping malformed frame");
                                continue;
                            }
                        };
                        if let ServerFrame::Ack { uuid, .. } = &frame {
                            in_flight.remove(uuid);
                        }
                        match dispatch_frame(shared, frame).await {
                            DispatchOutcome::Continue => {}
                            DispatchOutcome::ResyncWorkflow { workflow_id } => {
                                match backend.fetch_workflow(&workflow_id).await {
                                    Ok(fresh) => {
                                        shared.workflows.resync(&fresh).await;
                                        shared.emit(SessionEvent::WorkflowResynced(fresh));
                                    }
                                    Err(err) => {
                                        warn!(workflow = %workflow_id, %err, "workflow resync failed")
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_))) => {}
                    Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_)) | None => {
                        break JoinedExit::LinkLost;
                    }
                    Some(Ok(_)) => {}
                }
            }

            Some(command) = outbound.recv() => {
                let deadline = Instant::now() + config.ack_timeout();
                let (uuid, entry, wire) = match command {
                    OutboundCommand::Chat { room_id, uuid, content } => (
                        uuid.clone(),
                        InFlight { kind: InFlightKind::Chat { room_id: room_id.clone() }, deadline },
                        ClientCommand::Chat { room_id, uuid, content },
                    ),
                    OutboundCommand::Workflow { room_id, uuid, workflow_id, seq_number, action } => (
                        uuid.clone(),
                        InFlight {
                            kind: InFlightKind::Workflow { room_id: room_id.clone(), action: action.clone() },
                            deadline,
                        },
                        ClientCommand::Workflow { uuid, workflow_id, room_id, seq_number, action },
                    ),
                };
                in_flight.insert(uuid.clone(), entry);
                if let Err(err) = send_command(&mut sink, &wire).await {
                    warn!(uuid = %uuid, %err, "command send failed");
                    break JoinedExit::LinkLost;
                }
                debug!(uuid = %uuid, "command sent, awaiting ack");
            }

            _ = sweep.tick() => {
                let now = Instant::now();
                let expired: Vec<String> = in_flight
                    .iter()
                    .filter(|(_, f)| f.deadline <= now)
                    .map(|(uuid, _)| uuid.clone())
                    .collect();
                let timeout = SessionError::SendTimeout(config.ack_timeout());
                let mut join_lost = false;
                for uuid in expired {
                    if let Some(flight) = in_flight.remove(&uuid) {
                        if let InFlightKind::Join { room_id } = &flight.kind {
                            warn!(room = %room_id, error = %timeout, "join not acknowledged");
                            join_lost = true;
                        } else {
                            warn!(uuid = %uuid, error = %timeout, "no ack within timeout, marking failed");
                            fail_flight(shared, uuid, flight.kind).await;
                        }
                    }
                }
                if join_lost {
                    break JoinedExit::LinkLost;
                }
            }
        }
    };

    // Anything still awaiting an ack will never get one on this socket.
    for (uuid, flight) in in_flight.drain() {
        fail_flight(shared, uuid, flight.kind).await;
    }
    exit
}

async fn send_command<S>(sink: &mut S, command: &ClientCommand) -> Result<(), SessionError>
where
    S: futures::Sink<tungstenite::Message> + Unpin,
{
    let json = match serde_json::to_string(command) {
        Ok(json) => json,
        Err(err) => {
            // Serialization of our own types failing is a bug, not a link
            // problem; drop the frame rather than tearing the socket down.
            warn!(%err, "failed to encode outbound command");
            return Ok(());
        }
    };
    sink.send(tungstenite::Message::Text(json.into()))
        .await
        .map_err(|_| SessionError::TransportDisconnected)
}

async fn fail_flight(shared: &SessionShared, uuid: String, kind: InFlightKind) {
    match kind {
        // The join never subscribed anything to undo; the reconnect loop
        // reissues it on the next socket.
        InFlightKind::Join { .. } => {}
        InFlightKind::Chat { room_id } => {
            shared.store.mark_failed(&uuid).await;
            shared.emit(SessionEvent::MessageUpdated {
                room_id,
                uuid,
                status: DeliveryStatus::Failed,
                server_id: None,
            });
        }
        InFlightKind::Workflow { room_id, action } => {
            // The action never reached the engine; dropping the pending
            // entry returns the workflow to its pre-send state.
            shared.pending_actions.write().await.remove(&uuid);
            shared.emit(SessionEvent::WorkflowActionFailed {
                room_id,
                uuid,
                action,
            });
        }
    }
}
