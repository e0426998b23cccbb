/// Session state and the user-driven transitions on it
///
/// [`ChatState`] bundles everything the session task owns: who is logged in,
/// which channel is open, the channel directory and the displayed messages.
/// Transitions return [`Effect`]s instead of performing I/O, so they can be
/// tested without a transport or a UI.
use crate::directory::ChannelDirectory;
use crate::effect::{CredentialFlow, Effect};
use crate::error::{ChatError, Result};
use crate::model::{ChatId, Message, PublicIdentity, User, UserId, GROUP_CHAT_ID, NOTES_CHANNEL_TITLE};
use crate::password::password_hash;
use crate::protocol::{ChannelsRequest, LoginData, MessagesRequest, Outbound, OutgoingMessage};
use tracing::debug;

/// Who the viewer is and what they are looking at
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub current_user: Option<User>,
    pub logged_in: bool,
    pub current_channel_id: ChatId,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            current_user: None,
            logged_in: false,
            current_channel_id: GROUP_CHAT_ID,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Viewer id, present once a login succeeded
    pub fn viewer_id(&self) -> Option<UserId> {
        self.current_user.as_ref().map(|u| u.id)
    }

    pub fn login(&mut self, user: User) {
        self.current_user = Some(user);
        self.logged_in = true;
        self.current_channel_id = GROUP_CHAT_ID;
    }

    pub fn mark_login_failed(&mut self) {
        self.logged_in = false;
    }

    pub fn switch_channel(&mut self, id: ChatId) {
        debug!("Switching to channel {}", id);
        self.current_channel_id = id;
    }

    /// The logged-in user, or a precondition error
    pub fn require_user(&self) -> Result<&User> {
        match (&self.current_user, self.logged_in) {
            (Some(user), true) => Ok(user),
            _ => Err(ChatError::not_logged_in()),
        }
    }
}

/// State owned by the session task
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub session: SessionState,
    pub directory: ChannelDirectory,
    pub messages: Vec<Message>,
}

fn require_connected(connected: bool) -> Result<()> {
    if connected {
        Ok(())
    } else {
        Err(ChatError::not_connected())
    }
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn viewer_id(&self) -> Option<UserId> {
        self.session.viewer_id()
    }

    /// Open a prompt for login or registration
    pub fn request_credentials(&self, flow: CredentialFlow, connected: bool) -> Result<Vec<Effect>> {
        require_connected(connected)?;
        let title = match flow {
            CredentialFlow::Login => "Login",
            CredentialFlow::Register => "Register",
        };
        Ok(vec![Effect::PromptCredentials {
            flow,
            title: title.to_string(),
        }])
    }

    /// Hash the password and send it with the chosen flow
    pub fn submit_credentials(
        &self,
        flow: CredentialFlow,
        username: &str,
        password: &str,
        connected: bool,
    ) -> Result<Vec<Effect>> {
        require_connected(connected)?;
        let data = LoginData {
            username: username.to_string(),
            password_hash: password_hash(password),
        };
        let event = match flow {
            CredentialFlow::Login => Outbound::Login(data),
            CredentialFlow::Register => Outbound::Register(data),
        };
        Ok(vec![Effect::Emit(event)])
    }

    pub fn send_message(&self, text: &str, connected: bool) -> Result<Vec<Effect>> {
        let user = self.session.require_user()?;
        require_connected(connected)?;
        Ok(vec![Effect::Emit(Outbound::Message(OutgoingMessage {
            author: user.public(),
            chat_id: self.session.current_channel_id,
            text: text.to_string(),
        }))])
    }

    /// Switch to the channel with the given selector title and load its history
    pub fn open_channel(&mut self, title: &str, connected: bool) -> Vec<Effect> {
        let id = self.directory.resolve_id(title, self.viewer_id());
        self.open_channel_id(id, connected)
    }

    pub fn open_channel_id(&mut self, id: ChatId, connected: bool) -> Vec<Effect> {
        self.session.switch_channel(id);
        self.load_messages(id, connected)
    }

    pub fn open_notes(&mut self, connected: bool) -> Result<Vec<Effect>> {
        let id = self.session.require_user()?.id;
        Ok(self.open_channel_id(id, connected))
    }

    /// Ask the server for a channel's history. Silently skipped when offline.
    pub fn load_messages(&self, id: ChatId, connected: bool) -> Vec<Effect> {
        match (&self.session.current_user, connected && self.session.logged_in) {
            (Some(user), true) => vec![Effect::Emit(Outbound::GetMessages(MessagesRequest {
                chat_id: id,
                requesting_user: user.clone(),
            }))],
            _ => Vec::new(),
        }
    }

    pub fn request_channels(&self) -> Vec<Effect> {
        match &self.session.current_user {
            Some(user) => vec![Effect::Emit(Outbound::GetChannels(ChannelsRequest {
                requesting_user: user.clone(),
            }))],
            None => Vec::new(),
        }
    }

    /// Open the private conversation with `identity`, creating it on first contact
    pub fn open_channel_by_user(&mut self, identity: &PublicIdentity) -> Vec<Effect> {
        if Some(identity.id) == self.viewer_id() {
            return vec![Effect::SelectChannel(NOTES_CHANNEL_TITLE.to_string())];
        }
        let mut effects = Vec::new();
        if self.directory.ensure_channel(identity, self.viewer_id()) {
            effects.push(Effect::RefreshChannelSelector);
        }
        effects.push(Effect::SelectChannel(identity.username.clone()));
        effects
    }
}
