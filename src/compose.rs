use crate::config::MessageDefaults;
use crate::models::EmailPayload;
use lettre::address::Envelope;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};
use std::path::Path;

const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("cannot attach {path}: {source}")]
    Attachment {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to build message: {0}")]
    Build(String),
}

/// `Return-Path` is not among lettre's built-in headers.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReturnPath(Address);

impl Header for ReturnPath {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Return-Path")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let address = s
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .parse::<Address>()?;
        Ok(Self(address))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), format!("<{}>", self.0))
    }
}

/// A message ready for the transport: headers, MIME body and SMTP envelope.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    message: Message,
}

impl ComposedMessage {
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Envelope recipients (`to` followed by `cc`).
    pub fn recipients(&self) -> &[Address] {
        self.message.envelope().to()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.message.headers().get_raw(name)
    }

    pub fn formatted(&self) -> Vec<u8> {
        self.message.formatted()
    }
}

/// Turns stored payloads into transport-ready messages, filling unset
/// sender fields from the configured defaults.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    defaults: MessageDefaults,
}

impl MessageComposer {
    pub fn new(defaults: MessageDefaults) -> Self {
        Self { defaults }
    }

    pub fn build(&self, payload: &EmailPayload) -> Result<ComposedMessage, ComposeError> {
        let to = parse_mailboxes(payload.to.as_deref().unwrap_or_default())?;
        if to.is_empty() {
            return Err(ComposeError::MissingField("to"));
        }
        let subject = payload
            .subject
            .as_deref()
            .ok_or(ComposeError::MissingField("subject"))?;
        let text_body = payload
            .text_body
            .as_deref()
            .ok_or(ComposeError::MissingField("text_body"))?;
        let html_body = payload.html_body.as_deref().unwrap_or(text_body);
        let cc = parse_mailboxes(payload.cc.as_deref().unwrap_or_default())?;

        let from = parse_mailbox(payload.from.as_deref().unwrap_or(&self.defaults.from))?;
        let sender = parse_mailbox(payload.sender.as_deref().unwrap_or(&self.defaults.sender))?;

        let recipients: Vec<Address> = to.iter().chain(cc.iter()).map(|m| m.email.clone()).collect();
        let envelope = Envelope::new(Some(sender.email.clone()), recipients)
            .map_err(|e| ComposeError::Build(e.to_string()))?;

        let mut builder = Message::builder()
            .from(from)
            .header(ReturnPath(sender.email))
            .subject(subject)
            .envelope(envelope);
        for mailbox in to {
            builder = builder.to(mailbox);
        }
        for mailbox in cc {
            builder = builder.cc(mailbox);
        }

        // No transfer encoding is forced: lettre keeps 7bit for plain ASCII and
        // falls back to quoted-printable or base64 for anything else.
        let alternative = MultiPart::alternative()
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(text_body.to_string()),
            )
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html_body.to_string()),
            );

        let body = if payload.attachments.is_empty() {
            alternative
        } else {
            let mut mixed = MultiPart::mixed().multipart(alternative);
            for path in &payload.attachments {
                mixed = mixed.singlepart(attachment(path)?);
            }
            mixed
        };

        let message = builder
            .multipart(body)
            .map_err(|e| ComposeError::Build(e.to_string()))?;
        Ok(ComposedMessage { message })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, ComposeError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| ComposeError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a comma-separated address list, skipping empty items.
fn parse_mailboxes(list: &str) -> Result<Vec<Mailbox>, ComposeError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_mailbox)
        .collect()
}

fn attachment(path: &Path) -> Result<SinglePart, ComposeError> {
    let content = std::fs::read(path).map_err(|source| ComposeError::Attachment {
        path: path.display().to_string(),
        source,
    })?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    let content_type =
        ContentType::parse(OCTET_STREAM).map_err(|e| ComposeError::Build(e.to_string()))?;

    Ok(Attachment::new(filename).body(content, content_type))
}
