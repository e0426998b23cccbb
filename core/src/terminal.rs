/// Terminal front end: a line-oriented presenter and the stdin command loop
use crate::client::ClientHandle;
use crate::model::{Message, PublicIdentity};
use crate::presenter::{CredentialPrompt, Credentials, Presenter};
use colored::*;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Credential prompt waiting for the next input line
#[derive(Clone, Default)]
pub struct PendingPrompt {
    slot: Arc<Mutex<Option<CredentialPrompt>>>,
}

impl PendingPrompt {
    fn put(&self, prompt: CredentialPrompt) {
        if let Ok(mut slot) = self.slot.lock() {
            // A newer prompt replaces an unanswered one
            if let Some(old) = slot.replace(prompt) {
                old.cancel();
            }
        }
    }

    fn take(&self) -> Option<CredentialPrompt> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }
}

pub struct TerminalPresenter {
    pending: PendingPrompt,
    selected: Option<String>,
    shown: usize,
}

impl TerminalPresenter {
    pub fn new(pending: PendingPrompt) -> Self {
        Self {
            pending,
            selected: None,
            shown: 0,
        }
    }

    fn print_message(message: &Message) {
        println!(
            "{} {} {}",
            message.timestamp.format("%H:%M").to_string().dimmed(),
            format!("{}:", message.author.username).cyan().bold(),
            message.text
        );
    }
}

impl Presenter for TerminalPresenter {
    fn notify(&mut self, description: &str) {
        for line in description.lines().filter(|l| !l.is_empty()) {
            println!("{} {}", "!".yellow().bold(), line.yellow());
        }
    }

    fn refresh_displayed_messages(&mut self, messages: &[Message]) {
        // A single append prints just the new message; anything else redraws
        match messages.last() {
            Some(last) if self.shown > 0 && messages.len() == self.shown + 1 => {
                Self::print_message(last)
            }
            _ => {
                let channel = self.selected.as_deref().unwrap_or("?");
                println!("{}", format!("── {} ──", channel).bright_cyan());
                messages.iter().for_each(Self::print_message);
            }
        }
        self.shown = messages.len();
    }

    fn refresh_channel_selector(&mut self, titles: &[String]) {
        let rendered: Vec<String> = titles
            .iter()
            .map(|t| {
                if self.selected.as_deref() == Some(t.as_str()) {
                    format!("[{}]", t).green().bold().to_string()
                } else {
                    t.clone()
                }
            })
            .collect();
        println!("{} {}", "Channels:".bright_white().bold(), rendered.join("  "));
    }

    fn select_channel(&mut self, title: &str) {
        self.selected = Some(title.to_string());
        self.shown = 0;
        println!("{} {}", "Channel:".bright_white().bold(), title.green());
    }

    fn prompt_credentials(&mut self, prompt: CredentialPrompt) {
        println!(
            "{} {}",
            format!("{}:", prompt.title).bright_white().bold(),
            "enter <username> <password> (empty line cancels)".dimmed()
        );
        self.pending.put(prompt);
    }

    fn set_profile_info(&mut self, text: &str) {
        println!("{}", text.bright_magenta().bold());
    }

    fn scroll_to_top(&mut self) {}
}

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Login,
    Register,
    Open(String),
    Notes,
    Direct(PublicIdentity),
    Channels,
    Help,
    Quit,
    Say(String),
    Nothing,
    Invalid(String),
}

pub fn parse_line(line: &str) -> InputCommand {
    let line = line.trim();
    if line.is_empty() {
        return InputCommand::Nothing;
    }
    if !line.starts_with('/') {
        return InputCommand::Say(line.to_string());
    }
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match command {
        "/login" => InputCommand::Login,
        "/register" => InputCommand::Register,
        "/notes" => InputCommand::Notes,
        "/channels" => InputCommand::Channels,
        "/help" => InputCommand::Help,
        "/quit" | "/exit" => InputCommand::Quit,
        "/open" if !rest.is_empty() => InputCommand::Open(rest.to_string()),
        "/open" => InputCommand::Invalid("Usage: /open <channel>".to_string()),
        "/dm" => {
            let mut parts = rest.splitn(2, ' ');
            match (parts.next().and_then(|id| id.parse::<i64>().ok()), parts.next()) {
                (Some(id), Some(name)) if !name.trim().is_empty() => {
                    InputCommand::Direct(PublicIdentity::new(id, name.trim()))
                }
                _ => InputCommand::Invalid("Usage: /dm <user id> <username>".to_string()),
            }
        }
        other => InputCommand::Invalid(format!("Unknown command: {}", other)),
    }
}

/// Answer a pending prompt with a "<username> <password>" line
fn answer_prompt(prompt: CredentialPrompt, line: &str) {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(username), Some(password)) => prompt.submit(Credentials::new(username, password)),
        _ => prompt.cancel(),
    }
}

fn print_usage() {
    println!("{}", "Commands:".bright_white().bold());
    println!("  {}                  Log in", "/login".cyan());
    println!("  {}               Create an account", "/register".cyan());
    println!("  {} <channel>         Switch channel", "/open".cyan());
    println!("  {}                  Open your notes", "/notes".cyan());
    println!("  {} <id> <username>     Talk to a user privately", "/dm".cyan());
    println!("  {}               Show channels", "/channels".cyan());
    println!("  {}                   Leave", "/quit".cyan());
    println!("  anything else is sent to the open channel");
}

/// Read stdin until EOF or /quit, forwarding commands to the session
pub async fn run_input_loop(client: ClientHandle, pending: PendingPrompt) -> anyhow::Result<()> {
    print_usage();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(prompt) = pending.take() {
            answer_prompt(prompt, &line);
            continue;
        }
        match parse_line(&line) {
            InputCommand::Login => client.show_login()?,
            InputCommand::Register => client.show_register()?,
            InputCommand::Open(title) => client.open_channel(&title)?,
            InputCommand::Notes => client.open_notes()?,
            InputCommand::Direct(identity) => client.open_channel_by_user(identity)?,
            InputCommand::Channels => client.show_channels()?,
            InputCommand::Help => print_usage(),
            InputCommand::Quit => break,
            InputCommand::Say(text) => client.send_message(&text)?,
            InputCommand::Nothing => {}
            InputCommand::Invalid(reason) => eprintln!("{} {}", "✗".red().bold(), reason.red()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::CredentialFlow;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("  "), InputCommand::Nothing);
        assert_eq!(parse_line("hello there"), InputCommand::Say("hello there".to_string()));
        assert_eq!(parse_line("/login"), InputCommand::Login);
        assert_eq!(parse_line("/open bob"), InputCommand::Open("bob".to_string()));
        assert!(matches!(parse_line("/open"), InputCommand::Invalid(_)));
        assert_eq!(
            parse_line("/dm 9 bob"),
            InputCommand::Direct(PublicIdentity::new(9, "bob"))
        );
        assert!(matches!(parse_line("/dm bob"), InputCommand::Invalid(_)));
        assert!(matches!(parse_line("/dance"), InputCommand::Invalid(_)));
    }

    #[tokio::test]
    async fn test_answer_prompt() {
        let (prompt, reply) = CredentialPrompt::new(CredentialFlow::Login, "Login");
        answer_prompt(prompt, "ann secret");
        assert_eq!(reply.await.unwrap(), Some(Credentials::new("ann", "secret")));

        let (prompt, reply) = CredentialPrompt::new(CredentialFlow::Login, "Login");
        answer_prompt(prompt, "");
        assert_eq!(reply.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_newer_prompt_cancels_older() {
        let pending = PendingPrompt::default();
        let (first, first_reply) = CredentialPrompt::new(CredentialFlow::Login, "Login");
        let (second, _second_reply) = CredentialPrompt::new(CredentialFlow::Register, "Register");
        pending.put(first);
        pending.put(second);
        assert_eq!(first_reply.await.unwrap(), None);
        assert_eq!(pending.take().map(|p| p.flow), Some(CredentialFlow::Register));
    }
}
