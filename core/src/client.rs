/// Chat client: the session task and the handle used to talk to it
///
/// All session state lives in one task. The transport, the retry loop, user
/// input and credential prompts only push [`Work`] onto its queue, so state
/// changes happen one at a time and in arrival order.
use crate::config::{Config, HostSettings};
use crate::dispatcher::EventDispatcher;
use crate::effect::{CredentialFlow, Effect};
use crate::error::{ChatError, Result};
use crate::model::PublicIdentity;
use crate::presenter::{CredentialPrompt, Credentials, Presenter};
use crate::protocol::{LoginData, Outbound};
use crate::session::ChatState;
use crate::supervisor::{ConnectionState, ConnectionSupervisor, RetryState};
use crate::transport::{Connector, TransportHandle};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Something the user asked for
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    ShowLogin,
    ShowRegister,
    SubmitCredentials {
        flow: CredentialFlow,
        credentials: Credentials,
    },
    SendMessage(String),
    OpenChannel(String),
    OpenNotes,
    OpenChannelByUser(PublicIdentity),
    ShowChannels,
}

/// Items on the session task's queue
#[derive(Debug)]
pub enum Work {
    /// Named event from the server
    Inbound { name: String, payload: Value },
    /// A (re)connection succeeded
    Connected {
        generation: u64,
        handle: TransportHandle,
    },
    Disconnected { generation: u64 },
    Notify(String),
    User(UserAction),
    Shutdown,
}

/// Cloneable front door to a running session
#[derive(Clone)]
pub struct ClientHandle {
    work_tx: mpsc::UnboundedSender<Work>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    connection: watch::Receiver<ConnectionState>,
    retry: watch::Receiver<RetryState>,
}

impl ClientHandle {
    pub fn show_login(&self) -> Result<()> {
        self.act(UserAction::ShowLogin)
    }

    pub fn show_register(&self) -> Result<()> {
        self.act(UserAction::ShowRegister)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<()> {
        self.act(UserAction::SubmitCredentials {
            flow: CredentialFlow::Login,
            credentials: Credentials::new(username, password),
        })
    }

    pub fn register(&self, username: &str, password: &str) -> Result<()> {
        self.act(UserAction::SubmitCredentials {
            flow: CredentialFlow::Register,
            credentials: Credentials::new(username, password),
        })
    }

    pub fn send_message(&self, text: &str) -> Result<()> {
        self.act(UserAction::SendMessage(text.to_string()))
    }

    pub fn open_channel(&self, title: &str) -> Result<()> {
        self.act(UserAction::OpenChannel(title.to_string()))
    }

    pub fn open_notes(&self) -> Result<()> {
        self.act(UserAction::OpenNotes)
    }

    pub fn open_channel_by_user(&self, identity: PublicIdentity) -> Result<()> {
        self.act(UserAction::OpenChannelByUser(identity))
    }

    pub fn show_channels(&self) -> Result<()> {
        self.act(UserAction::ShowChannels)
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn retry_state(&self) -> watch::Receiver<RetryState> {
        self.retry.clone()
    }

    /// Stop the retry loop, close the transport and end the session task
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let _ = self.work_tx.send(Work::Shutdown);
    }

    pub fn act(&self, action: UserAction) -> Result<()> {
        self.work_tx
            .send(Work::User(action))
            .map_err(|_| ChatError::Connectivity("Session has stopped".to_string()))
    }
}

/// The session task
pub struct ChatClient<P: Presenter> {
    state: ChatState,
    dispatcher: EventDispatcher,
    presenter: P,
    transport: Option<(u64, TransportHandle)>,
    connection: watch::Receiver<ConnectionState>,
    last_login: Option<LoginData>,
    work_tx: mpsc::UnboundedSender<Work>,
    work_rx: mpsc::UnboundedReceiver<Work>,
}

impl<P: Presenter> ChatClient<P> {
    /// Spawn the session task and start the initial connection in the background
    pub fn start<C: Connector>(
        config: &Config,
        connector: C,
        presenter: P,
    ) -> Result<(ClientHandle, JoinHandle<()>)> {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = ConnectionSupervisor::new(
            connector,
            config.retry,
            config.settings_path.clone(),
            work_tx.clone(),
            shutdown_rx,
        );

        let client = ChatClient::new(presenter, supervisor.state(), work_tx.clone(), work_rx)?;

        let handle = ClientHandle {
            work_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            connection: supervisor.state(),
            retry: supervisor.retry_state(),
        };

        let session = tokio::spawn(client.run());

        let settings = HostSettings::load_or_init(&config.settings_path);
        tokio::spawn(async move {
            supervisor.connect(&settings.host, settings.port, false).await;
        });

        Ok((handle, session))
    }

    fn new(
        presenter: P,
        connection: watch::Receiver<ConnectionState>,
        work_tx: mpsc::UnboundedSender<Work>,
        work_rx: mpsc::UnboundedReceiver<Work>,
    ) -> Result<Self> {
        Ok(ChatClient {
            state: ChatState::new(),
            dispatcher: EventDispatcher::with_default_bindings()?,
            presenter,
            transport: None,
            connection,
            last_login: None,
            work_tx,
            work_rx,
        })
    }

    async fn run(mut self) {
        info!("Session started");
        while let Some(work) = self.work_rx.recv().await {
            match work {
                Work::Inbound { name, payload } => self.on_inbound(&name, payload),
                Work::Connected { generation, handle } => self.on_connected(generation, handle),
                Work::Disconnected { generation } => self.on_disconnected(generation),
                Work::Notify(description) => self.presenter.notify(&description),
                Work::User(action) => self.on_user_action(action),
                Work::Shutdown => break,
            }
        }
        if let Some((_, transport)) = self.transport.take() {
            transport.close();
        }
        info!("Session stopped");
    }

    fn is_connected(&self) -> bool {
        self.transport.is_some() && *self.connection.borrow() == ConnectionState::Connected
    }

    fn on_inbound(&mut self, name: &str, payload: Value) {
        match self.dispatcher.dispatch(&mut self.state, name, payload) {
            Ok(effects) => self.apply(effects),
            Err(e) => warn!("Failed to handle {}: {}", name, e),
        }
    }

    fn on_connected(&mut self, generation: u64, handle: TransportHandle) {
        info!("Transport {} attached", generation);
        if let Some((_, old)) = self.transport.replace((generation, handle)) {
            old.close();
        }
        // The server forgets us with the old socket; log back in.
        if self.state.session.logged_in {
            if let Some(login) = self.last_login.clone() {
                info!("Re-authenticating as {}", login.username);
                self.emit(Outbound::Login(login));
            }
        }
    }

    fn on_disconnected(&mut self, generation: u64) {
        match &self.transport {
            Some((current, _)) if *current == generation => {
                self.transport = None;
                self.presenter.notify("Disconnected!");
            }
            _ => debug!("Ignoring disconnect of stale transport {}", generation),
        }
    }

    fn on_user_action(&mut self, action: UserAction) {
        let connected = self.is_connected();
        let switches_channel = matches!(action, UserAction::OpenChannel(_) | UserAction::OpenNotes);
        let result = match action {
            UserAction::ShowLogin => self.state.request_credentials(CredentialFlow::Login, connected),
            UserAction::ShowRegister => {
                self.state.request_credentials(CredentialFlow::Register, connected)
            }
            UserAction::SubmitCredentials { flow, credentials } => self.state.submit_credentials(
                flow,
                &credentials.username,
                &credentials.password,
                connected,
            ),
            UserAction::SendMessage(text) => self.state.send_message(&text, connected),
            UserAction::OpenChannel(title) => Ok(self.state.open_channel(&title, connected)),
            UserAction::OpenNotes => self.state.open_notes(connected),
            UserAction::OpenChannelByUser(identity) => Ok(self.state.open_channel_by_user(&identity)),
            UserAction::ShowChannels => Ok(vec![Effect::RefreshChannelSelector]),
        };
        match result {
            Ok(effects) => {
                if switches_channel {
                    self.highlight_current_channel();
                }
                self.apply(effects)
            }
            Err(ChatError::Precondition(description)) => {
                debug!("Precondition failed: {}", description);
                self.presenter.notify(&description);
            }
            Err(e) => {
                error!("User action failed: {}", e);
                self.presenter.notify(&e.to_string());
            }
        }
    }

    /// Unknown titles fall back to the group channel, so highlight what actually opened
    fn highlight_current_channel(&mut self) {
        let current = self.state.session.current_channel_id;
        if let Some(title) = self.state.directory.title_of(current, self.state.viewer_id()) {
            self.presenter.select_channel(&title);
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::PromptCredentials { flow, title } => self.prompt(flow, title),
                Effect::SetProfileInfo(text) => self.presenter.set_profile_info(&text),
                Effect::RefreshMessages => self
                    .presenter
                    .refresh_displayed_messages(&self.state.messages),
                Effect::ScrollToTop => self.presenter.scroll_to_top(),
                Effect::RefreshChannelSelector => self
                    .presenter
                    .refresh_channel_selector(&self.state.directory.titles()),
                Effect::SelectChannel(title) => {
                    self.presenter.select_channel(&title);
                    let connected = self.is_connected();
                    queue.extend(self.state.open_channel(&title, connected));
                }
                Effect::Emit(event) => self.emit(event),
            }
        }
    }

    fn emit(&mut self, event: Outbound) {
        let Some((_, transport)) = &self.transport else {
            warn!("Dropping {}: no transport", event);
            return;
        };
        if let Outbound::Login(data) = &event {
            self.last_login = Some(data.clone());
        }
        debug!("Emitting {}", event);
        if let Err(e) = transport.emit(&event) {
            warn!("Failed to emit {}: {}", event, e);
        }
    }

    /// Show a prompt; the answer comes back through the queue
    fn prompt(&mut self, flow: CredentialFlow, title: String) {
        let (prompt, reply) = CredentialPrompt::new(flow, title);
        self.presenter.prompt_credentials(prompt);
        let work_tx = self.work_tx.clone();
        tokio::spawn(async move {
            if let Ok(Some(credentials)) = reply.await {
                let _ = work_tx.send(Work::User(UserAction::SubmitCredentials { flow, credentials }));
            }
        });
    }
}
