//! Deal Room - realtime collaboration session for marketplace conversations
//!
//! One [`RoomCoordinator`] per signed-in user ties together chat delivery,
//! job workflow state, presence, and unread counters over a single
//! reconnecting WebSocket, with an HTTP collaborator for authoritative
//! reseeds. Local state is optimistic where safe (chat) and ack-gated where
//! it is not (workflow transitions).
//!
//! # Example
//!
//! ```no_run
//! use deal_room::{HttpBackend, Room, RoomCoordinator, SessionConfig, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SessionConfig::default();
//!     let backend = HttpBackend::new(config.api_base_url.clone());
//!     let rooms: Vec<Room> = vec![/* from the conversation list endpoint */];
//!
//!     let coordinator =
//!         RoomCoordinator::new("user-1", "Dana", rooms, backend, config).await;
//!     coordinator.seed().await;
//!
//!     let mut events = coordinator.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             SessionEvent::MessageReceived(msg) => println!("{}: {}", msg.sender_name, msg.content),
//!             SessionEvent::UnreadChanged(unread) => println!("unread: {}", unread.total),
//!             _ => {}
//!         }
//!     }
//! }
//! ```

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod models;
pub mod presence;
pub mod unread;
pub mod workflows;
pub mod ws;

pub use backend::{Backend, HttpBackend};
pub use config::{ReconnectConfig, SessionConfig, load_config};
pub use coordinator::RoomCoordinator;
pub use error::SessionError;
pub use events::{LinkState, SessionEvent};
pub use models::{DeliveryStatus, Message, ReadReceipt, Room};
pub use presence::{PresencePhase, PresenceSnapshotItem, PresenceTracker, PresenceView};
pub use unread::{UnreadLedger, UnreadSnapshot};
pub use workflows::WorkflowSet;
