//! Line commands read from stdin.

use std::path::PathBuf;
use std::str::FromStr;

pub const HELP: &str = "\
commands:
  connect | disconnect
  mute | unmute
  interrupt
  persona <id>
  image <path> [prompt...]
  history | log | status
  help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Connect,
    Disconnect,
    Mute,
    Unmute,
    Interrupt,
    Persona(String),
    Image { path: PathBuf, prompt: String },
    History,
    Log,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl FromStr for ConsoleCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let command = match word.to_lowercase().as_str() {
            "" => return Err(CommandError::Empty),
            "connect" => ConsoleCommand::Connect,
            "disconnect" => ConsoleCommand::Disconnect,
            "mute" => ConsoleCommand::Mute,
            "unmute" => ConsoleCommand::Unmute,
            "interrupt" | "stop" => ConsoleCommand::Interrupt,
            "persona" => match rest.split_whitespace().next() {
                Some(id) => ConsoleCommand::Persona(id.to_string()),
                None => return Err(CommandError::Usage("persona <id>")),
            },
            "image" => {
                let (path, prompt) = match rest.split_once(char::is_whitespace) {
                    Some((path, prompt)) => (path, prompt.trim()),
                    None => (rest, ""),
                };
                if path.is_empty() {
                    return Err(CommandError::Usage("image <path> [prompt...]"));
                }
                ConsoleCommand::Image {
                    path: PathBuf::from(path),
                    prompt: prompt.to_string(),
                }
            }
            "history" => ConsoleCommand::History,
            "log" => ConsoleCommand::Log,
            "status" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!("mute".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Mute));
        assert_eq!("  UNMUTE ".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Unmute));
        assert_eq!("stop".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Interrupt));
        assert_eq!("exit".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Quit));
        assert_eq!("status".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Status));
    }

    #[test]
    fn test_parse_persona() {
        assert_eq!(
            "persona ryan".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Persona("ryan".into()))
        );
        assert_eq!(
            "persona".parse::<ConsoleCommand>(),
            Err(CommandError::Usage("persona <id>"))
        );
    }

    #[test]
    fn test_parse_image_with_and_without_prompt() {
        assert_eq!(
            "image ./cat.png what breed is this?".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Image {
                path: PathBuf::from("./cat.png"),
                prompt: "what breed is this?".into(),
            })
        );
        assert_eq!(
            "image ./cat.png".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Image {
                path: PathBuf::from("./cat.png"),
                prompt: String::new(),
            })
        );
        assert!(matches!(
            "image".parse::<ConsoleCommand>(),
            Err(CommandError::Usage(_))
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("   ".parse::<ConsoleCommand>(), Err(CommandError::Empty));
        assert_eq!(
            "dance".parse::<ConsoleCommand>(),
            Err(CommandError::Unknown("dance".into()))
        );
    }
}
