//! Slash command parsing for the terminal client.
//!
//! Lines starting with `/` control the session and are never sent to the relay.

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Abort any open turn and clear the conversation.
    Clear,

    /// Change the model.
    Model(String),

    /// List the registered models.
    Models,

    /// Resubmit the last user message.
    Retry,

    /// Show the draft buffer, or dismiss the current notice to recover an unanswered message.
    Draft,

    /// Display help information.
    Help,

    /// Exit the client.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `None` if the input should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use relaychat::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/model gpt-4o-2024-05-13").is_some());
/// assert!(parse_command("Hello!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "clear" => ChatCommand::Clear,
        "model" => match argument {
            Some(model) => ChatCommand::Model(model.to_string()),
            None => ChatCommand::Invalid("/model requires a model name".to_string()),
        },
        "models" => ChatCommand::Models,
        "retry" | "r" => ChatCommand::Retry,
        "draft" => ChatCommand::Draft,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /clear                 Abort any response and clear the conversation
  /model <name>          Change the model (e.g., /model claude-3-opus-20240229)
  /models                List available models
  /retry                 Resend the last message
  /draft                 Dismiss the last error and recover an unanswered message
  /help                  Show this help message
  /quit                  Exit the chat

Press Ctrl+C while a response is streaming to abort it."#
}
