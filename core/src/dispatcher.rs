/// Event dispatcher: binds inbound event names to state transitions
use crate::effect::{CredentialFlow, Effect};
use crate::error::{ChatError, Result};
use crate::model::{Channel, Message, User, GROUP_CHANNEL_TITLE, GROUP_CHAT_ID};
use crate::protocol::{inbound, AuthFailure};
use crate::router::is_visible;
use crate::session::ChatState;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// A transition: mutate the state, return what should happen outside of it
pub type Handler = fn(&mut ChatState, Value) -> Result<Vec<Effect>>;

pub struct EventDispatcher {
    handlers: HashMap<String, Handler>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Empty table, no bindings
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Table with every binding the chat client needs
    pub fn with_default_bindings() -> Result<Self> {
        let mut dispatcher = Self::new();
        dispatcher.register(inbound::LOGIN_FAILED, on_login_failed)?;
        dispatcher.register(inbound::REGISTER_FAILED, on_register_failed)?;
        dispatcher.register(inbound::LOGIN_SUCCESS, on_login_success)?;
        dispatcher.register(inbound::MESSAGE, on_message)?;
        dispatcher.register(inbound::MESSAGES_BATCH, on_messages_batch)?;
        dispatcher.register(inbound::CHANNELS_LIST, on_channels_list)?;
        Ok(dispatcher)
    }

    /// Bind `event` to `handler`. A second binding for the same name is rejected.
    pub fn register(&mut self, event: &str, handler: Handler) -> Result<()> {
        if self.handlers.contains_key(event) {
            return Err(ChatError::DuplicateHandler(event.to_string()));
        }
        self.handlers.insert(event.to_string(), handler);
        Ok(())
    }

    pub fn is_bound(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Run the handler bound to `event`. Unbound events produce no effects.
    pub fn dispatch(&self, state: &mut ChatState, event: &str, payload: Value) -> Result<Vec<Effect>> {
        match self.handlers.get(event) {
            Some(handler) => {
                debug!("Dispatching {}", event);
                handler(state, payload)
            }
            None => {
                debug!("No handler for event {}", event);
                Ok(Vec::new())
            }
        }
    }
}

fn decode<T: DeserializeOwned>(event: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| ChatError::Protocol(format!("Invalid {} payload: {}", event, e)))
}

fn on_login_failed(state: &mut ChatState, payload: Value) -> Result<Vec<Effect>> {
    let failure: AuthFailure = decode(inbound::LOGIN_FAILED, payload)?;
    Ok(reprompt(state, CredentialFlow::Login, failure))
}

fn on_register_failed(state: &mut ChatState, payload: Value) -> Result<Vec<Effect>> {
    let failure: AuthFailure = decode(inbound::REGISTER_FAILED, payload)?;
    Ok(reprompt(state, CredentialFlow::Register, failure))
}

/// Auth errors are recovered by asking again, titled with the server's reason
fn reprompt(state: &mut ChatState, flow: CredentialFlow, failure: AuthFailure) -> Vec<Effect> {
    info!("{:?} rejected: {}", flow, ChatError::Auth(failure.description.clone()));
    state.session.mark_login_failed();
    vec![
        Effect::PromptCredentials {
            flow,
            title: failure.description,
        },
        Effect::SetProfileInfo("FAILED LOGIN".to_string()),
    ]
}

fn on_login_success(state: &mut ChatState, payload: Value) -> Result<Vec<Effect>> {
    let user: User = decode(inbound::LOGIN_SUCCESS, payload)?;
    info!("Logged in as {} (id {})", user.username, user.id);
    let welcome = format!("WELCOME, {}", user.username);
    state.session.login(user);
    state.messages.clear();

    // The group channel's history is loaded once the channel list arrives
    // and the group entry gets selected.
    let mut effects = vec![Effect::SetProfileInfo(welcome), Effect::RefreshMessages];
    effects.extend(state.request_channels());
    Ok(effects)
}

fn on_message(state: &mut ChatState, payload: Value) -> Result<Vec<Effect>> {
    let message: Message = decode(inbound::MESSAGE, payload)?;
    if !is_visible(&message, &state.session) {
        debug!(
            "Message from {} to chat {} not shown in channel {}",
            message.author, message.chat_id, state.session.current_channel_id
        );
        return Ok(Vec::new());
    }
    state.messages.push(message);
    Ok(vec![Effect::RefreshMessages])
}

fn on_messages_batch(state: &mut ChatState, payload: Value) -> Result<Vec<Effect>> {
    let messages: Vec<Message> = decode(inbound::MESSAGES_BATCH, payload)?;
    info!("Got messages count = {}", messages.len());
    state.messages = messages;
    Ok(vec![Effect::RefreshMessages, Effect::ScrollToTop])
}

fn on_channels_list(state: &mut ChatState, payload: Value) -> Result<Vec<Effect>> {
    let channels: Vec<Channel> = decode(inbound::CHANNELS_LIST, payload)?;
    info!("Got channels count = {}", channels.len());
    let viewer = state.viewer_id();
    state.directory.replace_all(channels, viewer);

    let mut effects = vec![Effect::RefreshChannelSelector];
    if state.session.current_channel_id == GROUP_CHAT_ID {
        effects.push(Effect::SelectChannel(GROUP_CHANNEL_TITLE.to_string()));
    }
    Ok(effects)
}
