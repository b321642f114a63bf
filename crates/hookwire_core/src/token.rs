//! Deterministic identities for modules, handlers, callbacks and services.
//!
//! Every live object the engine creates is stored in the container under its
//! [`Token`]. Tokens are plain strings with a kind prefix:
//!
//! | Kind     | Form                                             |
//! |----------|--------------------------------------------------|
//! | module   | `module:{id}`                                    |
//! | handler  | `handler:{id}`                                   |
//! | callback | `callback:{handler}::{method}@{event}#{priority}`|
//! | instance | `instance:{id}`                                  |
//! | service  | `service:{id}`                                   |
//!
//! The module also names the engine's internal events and renders `{name}`
//! templates inside callback event names.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::reflect::Strategy;

/// Prefix of every engine-internal event.
pub const EVENT_PREFIX: &str = "hookwire";

/// The kind of object a [`Token`] identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// A module descriptor.
    Module,
    /// A handler descriptor.
    Handler,
    /// A callback descriptor.
    Callback,
    /// A constructed handler instance.
    Instance,
    /// An auto-wired service.
    Service,
}

impl TokenKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Module => "module:",
            Self::Handler => "handler:",
            Self::Callback => "callback:",
            Self::Instance => "instance:",
            Self::Service => "service:",
        }
    }
}

/// A container key identifying one engine object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Token of a module.
    #[must_use]
    pub fn module(id: &str) -> Self {
        Self(format!("module:{id}"))
    }

    /// Token of a handler descriptor.
    #[must_use]
    pub fn handler(id: &str) -> Self {
        Self(format!("handler:{id}"))
    }

    /// Token of a callback. The event is the declared (unrendered) name.
    #[must_use]
    pub fn callback(handler_id: &str, method: &str, event: &str, priority: i32) -> Self {
        Self(format!("callback:{handler_id}::{method}@{event}#{priority}"))
    }

    /// Token under which a handler's constructed instance is stored.
    #[must_use]
    pub fn instance(id: &str) -> Self {
        Self(format!("instance:{id}"))
    }

    /// Token of an auto-wired service.
    #[must_use]
    pub fn service(id: &str) -> Self {
        Self(format!("service:{id}"))
    }

    /// Wraps an existing token string.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The kind encoded in the prefix.
    #[must_use]
    pub fn kind(&self) -> Option<TokenKind> {
        [
            TokenKind::Module,
            TokenKind::Handler,
            TokenKind::Callback,
            TokenKind::Instance,
            TokenKind::Service,
        ]
        .into_iter()
        .find(|kind| self.0.starts_with(kind.prefix()))
    }

    /// The class id the token refers to.
    ///
    /// For callbacks this is the owning handler's id.
    #[must_use]
    pub fn class_id(&self) -> Option<&str> {
        let kind = self.kind()?;
        let rest = &self.0[kind.prefix().len()..];
        match kind {
            TokenKind::Callback => rest.split_once("::").map(|(handler, _)| handler),
            _ => Some(rest),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

/// Internal event that completes initialization of a queued handler.
///
/// ```
/// use hookwire_core::reflect::Strategy;
/// use hookwire_core::token::init_event;
///
/// assert_eq!(init_event(Strategy::Lazy, "app.cart"), "hookwire/lazy/app.cart");
/// ```
#[must_use]
pub fn init_event(strategy: Strategy, handler_id: &str) -> String {
    format!("{EVENT_PREFIX}/{}/{handler_id}", strategy.as_str())
}

/// Event fired once a handler reaches `Ready`.
#[must_use]
pub fn initialized_event(handler_id: &str) -> String {
    format!("{EVENT_PREFIX}/{handler_id}/initialized")
}

/// Names of the `{name}` fragments in `template`, in order of appearance.
#[must_use]
pub fn template_fragments(template: &str) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else { break };
        fragments.push(&after[..end]);
        rest = &after[end + 1..];
    }
    fragments
}

/// Substitutes every `{name}` fragment using `lookup`.
///
/// # Errors
///
/// Returns the name of the first fragment `lookup` cannot supply.
pub fn render_template<F>(template: &str, mut lookup: F) -> Result<String, String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else { break };
        let name = &after[..end];
        let value = lookup(name).ok_or_else(|| name.to_string())?;
        out.push_str(&rest[..start]);
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
