//! The terminal chat client's library half.
//!
//! # Architecture
//!
//! - [`session`]: the conversation session state machine
//! - [`delayed_flag`]: the timer behind the abort affordance
//! - [`commands`]: slash command parsing
//! - [`config`]: CLI argument parsing and configuration

pub mod commands;
pub mod config;
pub mod delayed_flag;
pub mod session;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ClientArgs, ClientConfig, DEFAULT_STORE_DIR};
pub use delayed_flag::{ABORT_VISIBILITY_DELAY, DelayedFlag};
pub use session::{ChatSession, Notice, SessionState, TurnOutcome, TurnUpdate};
