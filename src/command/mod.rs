//! Operator command execution for the edge device
//!
//! This module handles:
//! - Parsing operator input lines into commands
//! - Dispatching them to the flight plan state machine
//! - Reporting the outcome back to the operator

mod executor;
mod parser;

pub use executor::{CommandExecutor, CommandResult};
pub use parser::{OperatorCommand, ParseError};
