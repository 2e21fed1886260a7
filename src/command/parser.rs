//! Operator command parsing

use std::fmt;
use std::str::FromStr;

/// A command typed by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Open a stored plan, optionally remembering it for resume
    Open { uuid: String, resume: bool },
    /// Execute the open editable plan
    Start,
    Resume,
    Pause,
    Stop,
    /// Print the current state
    Status,
    /// List the plans of the current project
    List,
    Help,
    Quit,
}

impl OperatorCommand {
    pub const USAGE: &'static str = "commands: open <uuid> [resume] | start | resume | pause | stop | status | list | help | quit";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Unknown(String),
    MissingArgument(&'static str),
    UnexpectedArgument(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty command"),
            ParseError::Unknown(cmd) => write!(f, "unknown command '{}'", cmd),
            ParseError::MissingArgument(arg) => write!(f, "missing argument <{}>", arg),
            ParseError::UnexpectedArgument(arg) => write!(f, "unexpected argument '{}'", arg),
        }
    }
}

impl std::error::Error for ParseError {}

impl FromStr for OperatorCommand {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(ParseError::Empty)?.to_ascii_lowercase();

        let command = match name.as_str() {
            "open" => {
                let uuid = words.next().ok_or(ParseError::MissingArgument("uuid"))?.to_string();
                let resume = match words.next() {
                    None => false,
                    Some(flag) if flag.eq_ignore_ascii_case("resume") => true,
                    Some(other) => return Err(ParseError::UnexpectedArgument(other.into())),
                };
                OperatorCommand::Open { uuid, resume }
            }
            "start" => OperatorCommand::Start,
            "resume" => OperatorCommand::Resume,
            "pause" => OperatorCommand::Pause,
            "stop" => OperatorCommand::Stop,
            "status" => OperatorCommand::Status,
            "list" | "ls" => OperatorCommand::List,
            "help" | "?" => OperatorCommand::Help,
            "quit" | "exit" => OperatorCommand::Quit,
            other => return Err(ParseError::Unknown(other.into())),
        };

        match words.next() {
            Some(extra) => Err(ParseError::UnexpectedArgument(extra.into())),
            None => Ok(command),
        }
    }
}
