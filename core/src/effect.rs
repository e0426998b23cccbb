/// Side effects produced by state transitions
///
/// Handlers never touch the presenter or the transport directly. They return a
/// list of effects and the session task carries them out in order.
use crate::protocol::Outbound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFlow {
    Login,
    Register,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Ask the user for credentials, titled with the given text
    PromptCredentials { flow: CredentialFlow, title: String },
    SetProfileInfo(String),
    RefreshMessages,
    ScrollToTop,
    RefreshChannelSelector,
    /// Highlight a channel in the selector and open it
    SelectChannel(String),
    Emit(Outbound),
}
