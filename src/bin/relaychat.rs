//! Interactive terminal client for a relaychat relay.
//!
//! The conversation is persisted under the store directory and resumed on the next start.  A
//! message that was sent but never answered is placed back on the prompt for editing.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a local relay
//! relaychat
//!
//! # Talk to a remote relay with credentials and a specific model
//! relaychat --relay-url https://relay.example/api/message --username alice \
//!     --password s3cret --model claude-3-opus-20240229
//! ```
//!
//! # Commands
//!
//! - `/help` - Show available commands
//! - `/clear` - Clear the conversation
//! - `/model <name>` - Change the model
//! - `/models` - List models
//! - `/retry` - Resend the last message
//! - `/draft` - Dismiss the last error and recover an unanswered message
//! - `/quit` - Exit the application

use std::io::Write;
use std::sync::{Arc, Mutex};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use relaychat::chat::{
    ChatCommand, ChatSession, ClientArgs, ClientConfig, TurnOutcome, help_text, parse_command,
};
use relaychat::{Error, FileStore, MODEL_DEFS, RelayClient};

type Session = ChatSession<FileStore, RelayClient>;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ClientArgs::from_command_line_relaxed("relaychat [OPTIONS]");
    let config = ClientConfig::from(args);

    let mut session = ChatSession::restore(config.store()?, config.relay_client()?)?;
    if let Some(model) = &config.model {
        session.set_model(model.clone())?;
    }
    let mut rl = DefaultEditor::new()?;

    // Token of the turn currently streaming, if any.
    let in_flight: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
    let handler_slot = Arc::clone(&in_flight);
    ctrlc::set_handler(move || {
        if let Ok(slot) = handler_slot.lock()
            && let Some(token) = slot.as_ref()
        {
            token.cancel();
        }
    })?;

    println!(
        "relaychat (model: {}, relay: {})",
        session.model(),
        config.relay_url
    );
    println!("Type /help for commands, /quit to exit\n");
    print_log(&session);

    loop {
        let draft = session.take_draft();
        let readline = if draft.is_empty() {
            rl.readline("You: ")
        } else {
            rl.readline_with_initial("You: ", (draft.as_str(), ""))
        };

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Clear => match session.clear() {
                            Ok(()) => println!("    Conversation cleared."),
                            Err(err) => print_error(&err),
                        },
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {line}");
                            }
                        }
                        ChatCommand::Model(model) => match session.set_model(model.clone()) {
                            Ok(()) => println!("    Model changed to: {model}"),
                            Err(err) => print_error(&err),
                        },
                        ChatCommand::Models => {
                            for def in MODEL_DEFS {
                                let marker = if def.api_name == session.model() {
                                    "*"
                                } else {
                                    " "
                                };
                                println!(
                                    "    {marker} {:<42} {} ({})",
                                    def.api_name, def.display_name, def.provider
                                );
                            }
                        }
                        ChatCommand::Retry => match session.retry().await {
                            Ok(()) => run_turn(&mut session, &in_flight).await,
                            Err(err) => print_error(&err),
                        },
                        ChatCommand::Draft => {
                            if let Err(err) = session.dismiss_notice() {
                                print_error(&err);
                            }
                        }
                        ChatCommand::Invalid(message) => eprintln!("    error: {message}"),
                    }
                    continue;
                }

                match session.submit(line).await {
                    Ok(()) => run_turn(&mut session, &in_flight).await,
                    Err(err) => {
                        if session.log().last().is_none_or(|m| m.content != line) {
                            session.set_draft(line);
                        }
                        print_error(&err);
                        if matches!(err, Error::AwaitingRetry) || session.show_retry() {
                            println!("    Use /retry to resend or /draft to edit it.");
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("    error: input error: {err}");
                break;
            }
        }
    }

    Ok(())
}

async fn run_turn(session: &mut Session, in_flight: &Mutex<Option<CancellationToken>>) {
    set_in_flight(in_flight, session.abort_token());
    println!("Assistant:");
    let outcome = session
        .run_turn(|delta| {
            if let Some(content) = &delta.content {
                print!("{content}");
                let _ = std::io::stdout().flush();
            }
        })
        .await;
    set_in_flight(in_flight, None);
    println!();
    match outcome {
        Some(TurnOutcome::Completed) | None => {}
        Some(TurnOutcome::Aborted) => println!("    [aborted]"),
        Some(TurnOutcome::Failed(err)) => {
            print_error(&err);
            if session.show_retry() {
                println!("    Use /retry to resend or /draft to edit it.");
            }
        }
    }
    println!();
}

fn set_in_flight(slot: &Mutex<Option<CancellationToken>>, token: Option<CancellationToken>) {
    if let Ok(mut slot) = slot.lock() {
        *slot = token;
    }
}

fn print_log(session: &Session) {
    for message in session.messages() {
        println!("{}: {}\n", message.role, message.content);
    }
}

fn print_error(err: &Error) {
    eprintln!("    error: {err}");
}
