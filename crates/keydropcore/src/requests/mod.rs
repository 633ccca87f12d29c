//! Inbound requests as a closed set, and the replies they produce
//!
//! Transports turn their input into a [`Request`] with
//! [`Request::from_command`] or [`Request::from_callback`] and hand it to
//! [`RequestRouter::handle`]; the resulting [`Reply`] is plain text or bytes.

pub mod router;

use thiserror::Error;

use crate::core::error::ErrorKind;
use crate::entitlement::DurationSpec;

pub use router::RequestRouter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Start,
    Help,
    Redeem { token: String },
    MyKey,
    MyTime,
    GenerateKey { token: Option<String>, duration: DurationSpec },
    Revoke { token: String },
    Broadcast { text: String },
    Stock,
    Stats,
    Generate { resource: String },
    Restock { resource: String, content: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseRequestError {
    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Unknown command /{0}")]
    UnknownCommand(String),
}

impl ParseRequestError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

impl Request {
    /// Parses a command name (without the leading slash or bot suffix) and its
    /// argument text.
    pub fn from_command(name: &str, args: &str) -> Result<Request, ParseRequestError> {
        let name = name.trim().trim_start_matches('/').to_lowercase();
        let name = name.split('@').next().unwrap_or_default();
        let words: Vec<&str> = args.split_whitespace().collect();

        match name {
            "start" => Ok(Request::Start),
            "help" => Ok(Request::Help),
            "key" | "redeem" => match words.as_slice() {
                [token] => Ok(Request::Redeem {
                    token: token.to_string(),
                }),
                _ => Err(ParseRequestError::Usage("/key <KEY>")),
            },
            "mykey" => Ok(Request::MyKey),
            "mytime" => Ok(Request::MyTime),
            "genkey" => parse_genkey(&words),
            "revoke" => match words.as_slice() {
                [token] => Ok(Request::Revoke {
                    token: token.to_string(),
                }),
                _ => Err(ParseRequestError::Usage("/revoke <KEY>")),
            },
            "broadcast" => {
                let text = args.trim();
                if text.is_empty() {
                    Err(ParseRequestError::Usage("/broadcast <message>"))
                } else {
                    Ok(Request::Broadcast { text: text.to_string() })
                }
            }
            "stock" => Ok(Request::Stock),
            "stats" => Ok(Request::Stats),
            "generate" | "gen" => match words.as_slice() {
                // No resource named: fall back to the resource menu
                [] => Ok(Request::Start),
                [resource] => Ok(Request::Generate {
                    resource: resource.to_lowercase(),
                }),
                _ => Err(ParseRequestError::Usage("/generate <resource>")),
            },
            "restock" => parse_restock(args),
            other => Err(ParseRequestError::UnknownCommand(other.to_string())),
        }
    }

    /// Inline button data is the bare resource id.
    pub fn from_callback(data: &str) -> Option<Request> {
        let resource = data.trim().to_lowercase();
        if resource.is_empty() || resource.contains(char::is_whitespace) {
            return None;
        }
        Some(Request::Generate { resource })
    }

    /// Requests only configured admins may issue.
    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            Request::GenerateKey { .. }
                | Request::Revoke { .. }
                | Request::Broadcast { .. }
                | Request::Stock
                | Request::Stats
                | Request::Restock { .. }
        )
    }

    /// Stable name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Start => "start",
            Request::Help => "help",
            Request::Redeem { .. } => "redeem",
            Request::MyKey => "mykey",
            Request::MyTime => "mytime",
            Request::GenerateKey { .. } => "genkey",
            Request::Revoke { .. } => "revoke",
            Request::Broadcast { .. } => "broadcast",
            Request::Stock => "stock",
            Request::Stats => "stats",
            Request::Generate { .. } => "generate",
            Request::Restock { .. } => "restock",
        }
    }
}

/// `[duration]`, `[token]` or `[token] [duration]`.
fn parse_genkey(words: &[&str]) -> Result<Request, ParseRequestError> {
    match words {
        [] => Ok(Request::GenerateKey {
            token: None,
            duration: DurationSpec::default(),
        }),
        [single] if DurationSpec::is_duration(single) => Ok(Request::GenerateKey {
            token: None,
            duration: DurationSpec::parse(single),
        }),
        [token] => Ok(Request::GenerateKey {
            token: Some(token.to_string()),
            duration: DurationSpec::default(),
        }),
        [token, duration] => Ok(Request::GenerateKey {
            token: Some(token.to_string()),
            duration: DurationSpec::parse(duration),
        }),
        _ => Err(ParseRequestError::Usage("/genkey [token] [duration]")),
    }
}

/// First line names the resource, the remaining lines are the content.
fn parse_restock(args: &str) -> Result<Request, ParseRequestError> {
    const USAGE: &str = "/restock <resource> followed by lines, or a .txt document with that caption";

    let args = args.trim_start();
    let (head, content) = args.split_once('\n').unwrap_or((args, ""));
    let mut head_words = head.split_whitespace();
    let resource = head_words.next().ok_or(ParseRequestError::Usage(USAGE))?;

    // Lines may also follow the resource on the command line itself
    let inline: Vec<&str> = head_words.collect();
    let mut text = inline.join("\n");
    if !content.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(content);
    }
    if text.trim().is_empty() {
        return Err(ParseRequestError::Usage(USAGE));
    }

    Ok(Request::Restock {
        resource: resource.to_lowercase(),
        content: text,
    })
}

/// A single menu button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuOption {
    pub label: String,
    /// Callback payload, fed back through [`Request::from_callback`]
    pub data: String,
}

/// What the transport should send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Menu { text: String, options: Vec<MenuOption> },
    Document { file_name: String, bytes: Vec<u8>, caption: String },
    /// Deliver `text` to every recipient, then report the count to the sender
    Broadcast { recipients: Vec<i64>, text: String },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    /// Text content, for logging and tests.
    pub fn as_text(&self) -> &str {
        match self {
            Reply::Text(text) | Reply::Menu { text, .. } | Reply::Broadcast { text, .. } => text,
            Reply::Document { caption, .. } => caption,
        }
    }
}
