//! Session management and typed event dispatch between a client and the relay.

pub mod bus;
pub mod connection;
pub mod error;
pub mod events;
pub mod hub;
pub mod retry;
pub mod transport;

pub use bus::{EventBus, Subscription};
pub use connection::{spawn_connection, ConnectionCommand, ConnectionConfig, ConnectionHandle};
pub use error::NetError;
pub use hub::HubClient;
pub use retry::{ReconnectPolicy, RetryPolicy};
pub use transport::{AuthInfo, ConnectError, CredentialProvider, RelaySession, RelayTransport, SessionCall};
