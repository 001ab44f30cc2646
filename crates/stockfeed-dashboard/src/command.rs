//! User commands read from stdin.
//!
//! One command per line: `add <KEY>`, `remove <KEY>`, `list`, `quit`.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(String),
    Remove(String),
    List,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Missing key for {0}")]
    MissingKey(&'static str),

    #[error("Unexpected argument for {command}: {argument}")]
    ExtraArgument {
        command: &'static str,
        argument: String,
    },
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Ok(None);
        };
        let argument = parts.next();

        let (name, command) = match verb.to_ascii_lowercase().as_str() {
            "add" | "a" => (
                "add",
                Self::Add(argument.ok_or(CommandError::MissingKey("add"))?.to_string()),
            ),
            "remove" | "rm" => (
                "remove",
                Self::Remove(argument.ok_or(CommandError::MissingKey("remove"))?.to_string()),
            ),
            "list" | "ls" => ("list", Self::List),
            "quit" | "exit" | "q" => ("quit", Self::Quit),
            other => return Err(CommandError::Unknown(other.to_string())),
        };

        // Keys never contain whitespace.
        let extra = match command {
            Self::Add(_) | Self::Remove(_) => parts.next(),
            Self::List | Self::Quit => argument,
        };
        if let Some(extra) = extra {
            return Err(CommandError::ExtraArgument {
                command: name,
                argument: extra.to_string(),
            });
        }
        Ok(Some(command))
    }
}

/// Forward parsed commands from `input` until EOF, shutdown, or the
/// receiver goes away.
pub async fn read_commands<R>(input: R, tx: mpsc::Sender<Command>, shutdown: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => match Command::parse(&line) {
                Ok(Some(command)) => {
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Ignoring input line"),
            },
            Ok(None) => {
                debug!("Command input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read command input");
                break;
            }
        }
    }
}
