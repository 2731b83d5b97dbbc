//! Realtime Channel Protocol
//!
//! Frame types for the multiplexed per-room channel. Each frame carries a
//! `kind` discriminator; the dispatcher matches the sum type exhaustively,
//! so adding a kind is a compile-time-visible gap rather than a silent
//! default branch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use job_flow::{JobAction, TransitionEvent};

use crate::error::SessionError;
use crate::models::ReadReceipt;
use crate::presence::PresenceSnapshotItem;

/// A chat message as it appears on the wire (always server-acknowledged;
/// the optimistic fields of `models::Message` are local-only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub uuid: String,
    pub id: i64,
    pub seq: i64,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Frames received FROM the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServerFrame {
    /// A chat message broadcast into a joined room.
    Chat {
        #[serde(flatten)]
        message: WireMessage,
    },
    /// Room-scoped presence diff.
    #[serde(rename_all = "camelCase")]
    Presence {
        room_id: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        joins: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        leaves: Vec<String>,
    },
    /// User-scoped presence signal, independent of any room.
    GlobalPresence {
        #[serde(flatten)]
        item: PresenceSnapshotItem,
    },
    /// A workflow transition accepted by the server.
    Workflow {
        #[serde(flatten)]
        event: TransitionEvent,
    },
    /// Acknowledgment of an outbound command, keyed by the caller-generated
    /// uuid. Chat acks carry the server-assigned id and sequence.
    #[serde(rename_all = "camelCase")]
    Ack {
        uuid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_seq: Option<i64>,
    },
    /// Authoritative read-marker update (own other device, or the peer).
    ReadMarker {
        #[serde(flatten)]
        receipt: ReadReceipt,
    },
}

/// Commands sent TO the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Subscribe to a room channel. `last_seq` lets the server replay chat
    /// missed since the previous connection; the join is acknowledged by
    /// `uuid` like any other command.
    #[serde(rename_all = "camelCase")]
    Join {
        uuid: String,
        room_id: String,
        last_seq: i64,
    },
    /// Send a chat message; `uuid` is the optimistic client identifier the
    /// ack will reference.
    #[serde(rename_all = "camelCase")]
    Chat {
        room_id: String,
        uuid: String,
        content: String,
    },
    /// Issue a workflow action carrying the expected sequence number — one
    /// payload shape per action, flattened into the frame.
    #[serde(rename_all = "camelCase")]
    Workflow {
        uuid: String,
        workflow_id: String,
        room_id: String,
        seq_number: u64,
        #[serde(flatten)]
        action: JobAction,
    },
}

/// Parse one inbound text payload. Unknown kinds and shape mismatches are
/// `MalformedFrame` — the dispatch loop logs and drops them.
pub fn parse_frame(text: &str) -> Result<ServerFrame, SessionError> {
    serde_json::from_str(text).map_err(|e| SessionError::MalformedFrame(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_flow::{ActorRole, JobStatus, QuoteTerms};

    #[test]
    fn chat_frame_round_trip() {
        let frame = ServerFrame::Chat {
            message: WireMessage {
                uuid: "u-1".into(),
                id: 42,
                seq: 7,
                room_id: "r1".into(),
                sender_id: "peer".into(),
                sender_name: "Peer".into(),
                content: "hello".into(),
                created_at: Utc::now(),
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["kind"], "chat");
        assert_eq!(json["roomId"], "r1");
        assert_eq!(json["seq"], 7);

        let rt: ServerFrame = serde_json::from_value(json).unwrap();
        assert_eq!(rt, frame);
    }

    #[test]
    fn presence_frame_defaults_empty_vecs() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"kind":"presence","roomId":"r1","joins":["a"]}"#).unwrap();
        match frame {
            ServerFrame::Presence {
                room_id,
                joins,
                leaves,
            } => {
                assert_eq!(room_id, "r1");
                assert_eq!(joins, vec!["a"]);
                assert!(leaves.is_empty());
            }
            _ => panic!("Expected Presence"),
        }
    }

    #[test]
    fn global_presence_frame() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"kind":"globalPresence","userId":"u7","online":true}"#)
                .unwrap();
        match frame {
            ServerFrame::GlobalPresence { item } => {
                assert_eq!(item.user_id, "u7");
                assert!(item.online);
                assert!(item.last_seen.is_none());
            }
            _ => panic!("Expected GlobalPresence"),
        }
    }

    #[test]
    fn workflow_frame_carries_flattened_transition() {
        let json = serde_json::json!({
            "kind": "workflow",
            "workflowId": "wf-1",
            "roomId": "r1",
            "from": "created",
            "to": "quotationPendingReview",
            "seq": 1,
            "actor": "freelancer",
            "action": "submitQuotation",
            "terms": {"amountCents": 1000, "currency": "USD", "deliveryDays": 3},
            "at": "2026-02-01T12:00:00Z",
        });
        let frame: ServerFrame = serde_json::from_value(json).unwrap();
        match frame {
            ServerFrame::Workflow { event } => {
                assert_eq!(event.seq, 1);
                assert_eq!(event.to, JobStatus::QuotationPendingReview);
                assert_eq!(event.actor, ActorRole::Freelancer);
                assert!(matches!(event.action, JobAction::SubmitQuotation { .. }));
            }
            _ => panic!("Expected Workflow"),
        }
    }

    #[test]
    fn ack_frame_optional_fields() {
        let frame: ServerFrame = serde_json::from_str(r#"{"kind":"ack","uuid":"u-9"}"#).unwrap();
        match frame {
            ServerFrame::Ack {
                uuid,
                server_id,
                server_seq,
            } => {
                assert_eq!(uuid, "u-9");
                assert!(server_id.is_none());
                assert!(server_seq.is_none());
            }
            _ => panic!("Expected Ack"),
        }
    }

    #[test]
    fn workflow_command_shape_per_action() {
        let cmd = ClientCommand::Workflow {
            uuid: "c-1".into(),
            workflow_id: "wf-1".into(),
            room_id: "r1".into(),
            seq_number: 1,
            action: JobAction::SubmitQuotation {
                terms: QuoteTerms {
                    amount_cents: 5000,
                    currency: "EUR".into(),
                    delivery_days: 5,
                },
            },
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["kind"], "workflow");
        assert_eq!(json["seqNumber"], 1);
        assert_eq!(json["action"], "submitQuotation");
        assert_eq!(json["terms"]["amountCents"], 5000);

        let rt: ClientCommand = serde_json::from_value(json).unwrap();
        assert_eq!(rt, cmd);
    }

    #[test]
    fn join_command_serializes_last_seq() {
        let cmd = ClientCommand::Join {
            uuid: "j-1".into(),
            room_id: "r1".into(),
            last_seq: 17,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["kind"], "join");
        assert_eq!(json["uuid"], "j-1");
        assert_eq!(json["lastSeq"], 17);
    }

    #[test]
    fn malformed_frames_are_typed_errors() {
        assert!(matches!(
            parse_frame("not json"),
            Err(SessionError::MalformedFrame(_))
        ));
        assert!(matches!(
            parse_frame(r#"{"kind":"mystery"}"#),
            Err(SessionError::MalformedFrame(_))
        ));
        // Right kind, wrong shape
        assert!(matches!(
            parse_frame(r#"{"kind":"chat","roomId":"r1"}"#),
            Err(SessionError::MalformedFrame(_))
        ));
    }
}
