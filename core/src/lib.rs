/// Parley - chat client session core
///
/// Connection supervision with timed retries, session and channel state,
/// private-message routing and server event dispatch, behind a presenter
/// trait so any front end can drive it.

pub mod error;
pub mod config;
pub mod model;
pub mod password;
pub mod protocol;
pub mod transport;
pub mod directory;
pub mod session;
pub mod router;
pub mod effect;
pub mod dispatcher;
pub mod presenter;
pub mod supervisor;
pub mod client;
pub mod terminal;

pub use error::{ChatError, Result};
pub use config::{Config, HostSettings, RetryPolicy};
pub use client::{ChatClient, ClientHandle, UserAction};
pub use presenter::{CredentialPrompt, Credentials, Presenter};
pub use supervisor::{ConnectionState, RetryState};
pub use transport::{Connector, TcpConnector};
