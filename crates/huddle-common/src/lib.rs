pub mod errors;
pub mod ice;
pub mod id;
pub mod identity;
pub mod message;
pub mod protocol;

pub use errors::{AuthError, RelayError, StoreError};
pub use ice::IceServer;
pub use id::{new_id, ConnectionId};
pub use identity::{Identity, UserSummary};
pub use message::ChatMessage;
pub use protocol::{ClientFrame, ErrorCode, PresenceEntry, ServerFrame};
