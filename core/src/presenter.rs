/// Presentation layer contract
///
/// The session task is the only caller, so implementations get `&mut self`
/// and never see concurrent calls.
use crate::effect::CredentialFlow;
use crate::model::Message;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// A pending request for credentials. Answer it with [`submit`](Self::submit)
/// or [`cancel`](Self::cancel); dropping it counts as cancel.
#[derive(Debug)]
pub struct CredentialPrompt {
    pub flow: CredentialFlow,
    pub title: String,
    reply: oneshot::Sender<Option<Credentials>>,
}

impl CredentialPrompt {
    pub fn new(
        flow: CredentialFlow,
        title: impl Into<String>,
    ) -> (Self, oneshot::Receiver<Option<Credentials>>) {
        let (reply, rx) = oneshot::channel();
        let prompt = Self {
            flow,
            title: title.into(),
            reply,
        };
        (prompt, rx)
    }

    pub fn submit(self, credentials: Credentials) {
        let _ = self.reply.send(Some(credentials));
    }

    pub fn cancel(self) {
        let _ = self.reply.send(None);
    }
}

pub trait Presenter: Send + 'static {
    /// Show a user-facing notification (errors, connection status)
    fn notify(&mut self, description: &str);

    fn refresh_displayed_messages(&mut self, messages: &[Message]);

    fn refresh_channel_selector(&mut self, titles: &[String]);

    /// Highlight `title` in the channel selector
    fn select_channel(&mut self, title: &str);

    /// Ask for a username and password. Must not block.
    fn prompt_credentials(&mut self, prompt: CredentialPrompt);

    fn set_profile_info(&mut self, _text: &str) {}

    fn scroll_to_top(&mut self) {}
}
