use tether::ConversationId;
use thiserror::Error;

pub const HELP: &str = "\
/open <id>     open a conversation
/new <text>    start a conversation with a first message
/list          list conversations
/models        list models
/model <name>  select a model
/status        print engine state as JSON
/quit          exit
<text>         send a message in the open conversation";

/// One line typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Open(ConversationId),
    New(String),
    List,
    Models,
    Model(String),
    Status,
    Help,
    Quit,
    Say(String),
    Empty,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InputError {
    #[error("Unknown command: /{0} (try /help)")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

impl Input {
    pub fn parse(line: &str) -> Result<Self, InputError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Self::Empty);
        }

        let Some(command) = line.strip_prefix('/') else {
            return Ok(Self::Say(line.to_string()));
        };

        let (name, rest) = match command.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (command, ""),
        };

        match name {
            "open" | "o" => required(rest, "/open <id>").map(|id| Self::Open(ConversationId::from(id))),
            "new" | "n" => required(rest, "/new <text>").map(|text| Self::New(text.to_string())),
            "model" => required(rest, "/model <name>").map(|model| Self::Model(model.to_string())),
            "list" | "ls" => Ok(Self::List),
            "models" => Ok(Self::Models),
            "status" => Ok(Self::Status),
            "help" | "h" => Ok(Self::Help),
            "quit" | "q" | "exit" => Ok(Self::Quit),
            other => Err(InputError::Unknown(other.to_string())),
        }
    }
}

fn required<'a>(value: &'a str, usage: &'static str) -> Result<&'a str, InputError> {
    if value.is_empty() {
        Err(InputError::Usage(usage))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_sent() {
        assert_eq!(Input::parse("  hello there "), Ok(Input::Say("hello there".to_string())));
        assert_eq!(Input::parse("   "), Ok(Input::Empty));
    }

    #[test]
    fn test_commands_with_arguments() {
        assert_eq!(
            Input::parse("/open c1"),
            Ok(Input::Open(ConversationId::from("c1")))
        );
        assert_eq!(
            Input::parse("/new tell me a joke"),
            Ok(Input::New("tell me a joke".to_string()))
        );
        assert_eq!(
            Input::parse("/model qwen:7b"),
            Ok(Input::Model("qwen:7b".to_string()))
        );
    }

    #[test]
    fn test_missing_argument() {
        assert_eq!(Input::parse("/open"), Err(InputError::Usage("/open <id>")));
        assert_eq!(Input::parse("/new   "), Err(InputError::Usage("/new <text>")));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            Input::parse("/frobnicate now"),
            Err(InputError::Unknown("frobnicate".to_string()))
        );
    }

    #[test]
    fn test_aliases() {
        assert_eq!(Input::parse("/q"), Ok(Input::Quit));
        assert_eq!(Input::parse("/ls"), Ok(Input::List));
    }
}
