//! services/client/src/console/command.rs
//!
//! The line protocol of the interactive console. Lines starting with `/` are
//! commands; anything else is a chat message for the current conversation.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    /// List uploaded documents.
    Documents,
    Upload { path: String },
    DeleteDocument { document_id: String },
    /// Start a conversation. No ids means "every known document".
    NewConversation { document_ids: Vec<String> },
    Conversations,
    Open { conversation_id: String },
    Rename { title: String },
    /// Delete a conversation, the current one if no id is given.
    Delete { conversation_id: Option<String> },
    Attach { document_id: String },
    Detach { document_id: String },
    /// Ask the backend for a standalone diagram.
    Diagram { query: String },
    /// Render the latest diagram in the current conversation.
    Render,
    Send { content: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Unknown command /{0}. Type /help for the list of commands.")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
Commands:
  /docs                 list uploaded documents
  /upload <path>        upload a pdf, docx or txt file
  /rmdoc <id>           delete a document
  /new [doc ids...]     start a conversation (defaults to all documents)
  /chats                list conversations
  /open <id>            switch to a conversation
  /title <text>         rename the current conversation
  /delete [id]          delete a conversation (defaults to the current one)
  /attach <doc id>      add a document to the current conversation
  /detach <doc id>      remove a document from the current conversation
  /diagram <query>      request a diagram for the current conversation
  /render               render the latest diagram in the current conversation
  /quit                 exit
Anything else is sent as a message.";

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(body) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send {
            content: line.to_string(),
        }));
    };

    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };
    let required = |usage: &'static str| -> Result<String, ParseError> {
        if rest.is_empty() {
            Err(ParseError::Usage(usage))
        } else {
            Ok(rest.to_string())
        }
    };

    let command = match name {
        "help" | "h" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        "docs" => Command::Documents,
        "upload" => Command::Upload {
            path: required("/upload <path>")?,
        },
        "rmdoc" => Command::DeleteDocument {
            document_id: required("/rmdoc <id>")?,
        },
        "new" => Command::NewConversation {
            document_ids: rest.split_whitespace().map(str::to_string).collect(),
        },
        "chats" => Command::Conversations,
        "open" => Command::Open {
            conversation_id: required("/open <id>")?,
        },
        "title" => Command::Rename {
            title: required("/title <text>")?,
        },
        "delete" => Command::Delete {
            conversation_id: (!rest.is_empty()).then(|| rest.to_string()),
        },
        "attach" => Command::Attach {
            document_id: required("/attach <doc id>")?,
        },
        "detach" => Command::Detach {
            document_id: required("/detach <doc id>")?,
        },
        "diagram" => Command::Diagram {
            query: required("/diagram <query>")?,
        },
        "render" => Command::Render,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(
            parse("  what does clause 4 say?  ").unwrap(),
            Some(Command::Send {
                content: "what does clause 4 say?".to_string()
            })
        );
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse("   \t").unwrap(), None);
    }

    #[test]
    fn commands_with_arguments() {
        assert_eq!(
            parse("/new d1 d2").unwrap(),
            Some(Command::NewConversation {
                document_ids: vec!["d1".to_string(), "d2".to_string()]
            })
        );
        assert_eq!(
            parse("/new").unwrap(),
            Some(Command::NewConversation { document_ids: vec![] })
        );
        assert_eq!(
            parse("/title Q3 board pack").unwrap(),
            Some(Command::Rename {
                title: "Q3 board pack".to_string()
            })
        );
        assert_eq!(parse("/delete").unwrap(), Some(Command::Delete { conversation_id: None }));
        assert_eq!(
            parse("/delete c9").unwrap(),
            Some(Command::Delete {
                conversation_id: Some("c9".to_string())
            })
        );
        assert_eq!(
            parse("/upload ./reports/q3 summary.pdf").unwrap(),
            Some(Command::Upload {
                path: "./reports/q3 summary.pdf".to_string()
            })
        );
    }

    #[test]
    fn missing_arguments_and_unknown_commands() {
        assert_eq!(parse("/open"), Err(ParseError::Usage("/open <id>")));
        assert_eq!(parse("/detach  "), Err(ParseError::Usage("/detach <doc id>")));
        assert_eq!(parse("/frobnicate"), Err(ParseError::Unknown("frobnicate".to_string())));
    }
}
