//! Line commands written to the stdin of supervised processes.

use camino::Utf8PathBuf;
use snowstorm_core::error::{HarnessError, Result};
use snowstorm_core::station::StationId;
use winnow::ModalResult;
use winnow::ascii::{digit1, space0, space1};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::prelude::*;
use winnow::token::rest;

/// Commands understood by the station server's REPL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// `p [<file>]`: write the station table to `path`, or stdout when absent
    Dump { path: Option<Utf8PathBuf> },
    /// `q`
    Quit,
}

/// Commands understood by a station client's REPL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    /// `<id>`
    Join(StationId),
    /// `q`
    Quit,
}

impl ServerCommand {
    /// The command as written to stdin, without the trailing newline
    pub fn to_line(&self) -> String {
        match self {
            ServerCommand::Dump { path: Some(path) } => format!("p {path}"),
            ServerCommand::Dump { path: None } => "p".to_owned(),
            ServerCommand::Quit => "q".to_owned(),
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        server_command
            .parse(line.trim())
            .map_err(|e| HarnessError::Protocol(format!("invalid server command {line:?}: {e}")))
    }
}

impl ClientCommand {
    pub fn to_line(&self) -> String {
        match self {
            ClientCommand::Join(id) => id.to_string(),
            ClientCommand::Quit => "q".to_owned(),
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        client_command
            .parse(line.trim())
            .map_err(|e| HarnessError::Protocol(format!("invalid client command {line:?}: {e}")))
    }
}

fn server_command(input: &mut &str) -> ModalResult<ServerCommand> {
    alt((
        preceded(
            'p',
            opt(preceded(space1, rest)).map(|path: Option<&str>| ServerCommand::Dump {
                path: path
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(Utf8PathBuf::from),
            }),
        ),
        terminated('q', space0).map(|_| ServerCommand::Quit),
    ))
    .parse_next(input)
}

fn client_command(input: &mut &str) -> ModalResult<ClientCommand> {
    alt((
        terminated(digit1, eof)
            .try_map(|digits: &str| digits.parse::<StationId>())
            .map(ClientCommand::Join),
        terminated('q', eof).map(|_| ClientCommand::Quit),
    ))
    .parse_next(input)
}
