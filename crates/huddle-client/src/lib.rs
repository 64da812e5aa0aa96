//! huddle-client: client library for the huddle signaling server.
//!
//! Provides the persistent session (presence, chat, signaling frames),
//! REST history backfill, and the call state machine that drives one
//! peer-connection lifecycle per call attempt. Media capture and the
//! peer connection itself sit behind traits so the library stays free of
//! any particular WebRTC stack.

pub mod call;
pub mod history;
pub mod media;
pub mod session;

pub use call::{CallConfig, CallError, CallEvent, CallMachine, CallState, NegotiationRole};
pub use history::{fetch_history, HistoryError, RoomTimeline};
pub use media::{LocalMedia, MediaSource, PeerConnection, PeerConnectionFactory, PeerEvent};
pub use session::{Session, SessionConfig, SessionEvent};
