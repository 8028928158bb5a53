//! Parsing of the line-based commands read from stdin.

use april_core::time::secs_to_millis;
use april_core::{PlayerCommand, SyncInterval};
use std::path::PathBuf;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  p            play / pause          s            stop
  f / b        seek forward / back   seek <m:ss>  seek to a position
  n / v        next / previous track > / <        next / previous lyric line
  r            toggle repeat         x            toggle shuffle
  l            toggle loop playlist  open <path>  play a file
  lyrics on|off                      sync <secs>  lyric poll interval
  i            status                h            this help
  q            quit";

#[derive(Debug)]
pub enum Input {
    Command(PlayerCommand),
    Status,
    Help,
    Quit,
    Empty,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("unknown command {0:?} (h for help)")]
    Unknown(String),

    #[error("{command} needs an argument")]
    MissingArgument { command: &'static str },

    #[error("invalid position {0:?}, expected seconds or m:ss")]
    InvalidPosition(String),

    #[error("sync interval must be one of 0.1, 0.2, 0.3, 0.5, 0.7 or 1.0 seconds")]
    InvalidInterval,

    #[error("expected on or off")]
    InvalidToggle,
}

pub fn parse(line: &str) -> Result<Input, InputError> {
    let line = line.trim();
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(w, r)| (w, r.trim()));

    let command = match word {
        "" => return Ok(Input::Empty),
        "q" | "quit" => return Ok(Input::Quit),
        "h" | "?" | "help" => return Ok(Input::Help),
        "i" | "status" => return Ok(Input::Status),
        "p" => PlayerCommand::PlayPause,
        "play" => PlayerCommand::Play,
        "s" | "stop" => PlayerCommand::Stop,
        "f" => PlayerCommand::SeekForward,
        "b" => PlayerCommand::SeekBackward,
        "n" | "next" => PlayerCommand::Next,
        "v" | "prev" => PlayerCommand::Previous,
        ">" => PlayerCommand::NextLine,
        "<" => PlayerCommand::PreviousLine,
        "r" => PlayerCommand::ToggleRepeat,
        "x" => PlayerCommand::ToggleShuffle,
        "l" => PlayerCommand::ToggleLoopPlaylist,
        "seek" => PlayerCommand::SeekTo(parse_position(required(rest, "seek")?)?),
        "open" => PlayerCommand::PlayTrack(PathBuf::from(required(rest, "open")?)),
        "lyrics" => PlayerCommand::SetLyricsEnabled(match required(rest, "lyrics")? {
            "on" => true,
            "off" => false,
            _ => return Err(InputError::InvalidToggle),
        }),
        "sync" => {
            let secs: f64 = required(rest, "sync")?
                .parse()
                .map_err(|_| InputError::InvalidInterval)?;
            PlayerCommand::SetSyncInterval(
                SyncInterval::from_secs(secs).ok_or(InputError::InvalidInterval)?,
            )
        }
        other => return Err(InputError::Unknown(other.to_string())),
    };
    Ok(Input::Command(command))
}

fn required<'a>(rest: &'a str, command: &'static str) -> Result<&'a str, InputError> {
    if rest.is_empty() {
        Err(InputError::MissingArgument { command })
    } else {
        Ok(rest)
    }
}

/// `83`, `83.5` or `1:23` to milliseconds
fn parse_position(raw: &str) -> Result<u64, InputError> {
    let invalid = || InputError::InvalidPosition(raw.to_string());
    let secs = match raw.split_once(':') {
        Some((minutes, seconds)) => {
            let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
            let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
            f64::from(minutes) * 60.0 + seconds
        }
        None => raw.parse().map_err(|_| invalid())?,
    };
    secs_to_millis(secs).ok_or_else(invalid)
}
