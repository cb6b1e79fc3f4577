//! Automated responder ("bot") hook.
//!
//! A [`Responder`] looks at every chat message. When
//! [`should_respond`](Responder::should_respond) says yes, the server
//! broadcasts a typing indicator for the bot, awaits
//! [`respond`](Responder::respond), clears the indicator and posts the
//! reply as a chat message from the bot. All of it goes through the same
//! broadcast path as user events.

use std::future::Future;

/// Default display name of the bot.
pub const DEFAULT_BOT_NAME: &str = "AI_Bot";

const COMMAND_PREFIX: &[u8] = b"/bot";
const MENTION: &[u8] = b"@ai";
const GREETING: &str = "Hello! How can I help you?";

/// Decides whether to answer a message and produces the answer.
pub trait Responder: Send + Sync + 'static {
    /// Pure predicate over the message body. Must not block.
    fn should_respond(&self, body: &str) -> bool;

    /// Produces a reply to `body` posted by `author`, or `None` to stay
    /// quiet. May take as long as it likes; it runs off the session task.
    fn respond(&self, body: &str, author: &str)
    -> impl Future<Output = Option<String>> + Send;
}

/// Never responds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Responder for Silent {
    fn should_respond(&self, _body: &str) -> bool {
        false
    }

    async fn respond(&self, _body: &str, _author: &str) -> Option<String> {
        None
    }
}

/// Answers addressed messages with their own text.
///
/// Useful for demos and for exercising the bot flow without an external
/// model.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoResponder;

impl Responder for EchoResponder {
    fn should_respond(&self, body: &str) -> bool {
        is_mention(body)
    }

    async fn respond(&self, body: &str, _author: &str) -> Option<String> {
        let text = strip_mention(body);
        if text.is_empty() {
            Some(GREETING.to_string())
        } else {
            Some(text)
        }
    }
}

/// `true` if `body` starts with `/bot` or contains `@ai`, ignoring case
/// and surrounding whitespace.
pub fn is_mention(body: &str) -> bool {
    let body = body.trim().as_bytes();
    starts_with_command(body) || find_mention(body).is_some()
}

/// Removes a leading `/bot` and every `@ai`, ignoring case, and trims the
/// result.
pub fn strip_mention(body: &str) -> String {
    let mut rest = body.trim();
    if starts_with_command(rest.as_bytes()) {
        rest = &rest[COMMAND_PREFIX.len()..];
    }

    let mut out = String::with_capacity(rest.len());
    while let Some(pos) = find_mention(rest.as_bytes()) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + MENTION.len()..];
    }
    out.push_str(rest);
    out.trim().to_string()
}

fn starts_with_command(body: &[u8]) -> bool {
    body.len() >= COMMAND_PREFIX.len()
        && body[..COMMAND_PREFIX.len()].eq_ignore_ascii_case(COMMAND_PREFIX)
}

// Matches are ASCII, so the returned offset and offset + 3 are char
// boundaries.
fn find_mention(body: &[u8]) -> Option<usize> {
    body.windows(MENTION.len())
        .position(|window| window.eq_ignore_ascii_case(MENTION))
}
