//! Text commands accepted on the control channel

use std::str::FromStr;
use thiserror::Error;

/// One control request for the playback controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Stop,
    /// New replay delay in milliseconds
    Delay(u64),
    State,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Usage: delay <milliseconds>")]
    MissingDelay,

    #[error("Invalid delay: {0}")]
    InvalidDelay(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(CommandError::Empty);
        };

        match verb.to_ascii_lowercase().as_str() {
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            "stop" => Ok(Command::Stop),
            "state" => Ok(Command::State),
            "delay" => {
                let value = words.next().ok_or(CommandError::MissingDelay)?;
                value
                    .parse()
                    .map(Command::Delay)
                    .map_err(|_| CommandError::InvalidDelay(value.to_string()))
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}
