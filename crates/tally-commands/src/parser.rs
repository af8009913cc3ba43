//! Command parsing -- turns raw chat text into a [`CommandInvocation`].
//!
//! Two prefix forms are recognised:
//! - `/name arg1 arg2`
//! - `@system name arg1 arg2`
//!
//! Arguments are whitespace-delimited. A `'` or `"` opens a quoted span that
//! suppresses splitting until the same quote character closes it; the quotes
//! themselves are dropped. An unterminated quote runs to the end of input.

use serde::Serialize;

use tally_types::TallyError;

/// The mention prefix that addresses the command core directly.
pub const MENTION_PREFIX: &str = "@system";

/// Which prefix produced an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationForm {
    /// `/name ...`
    Slash,
    /// `@system name ...`
    Mention,
}

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInvocation {
    /// Lower-cased command name as typed (may be an alias).
    pub name: String,
    pub args: Vec<String>,
    /// The trimmed input.
    pub raw: String,
    pub form: InvocationForm,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("input is not a command")]
    NotACommand,

    #[error("command prefix without a command name")]
    MissingName,
}

impl From<ParseError> for TallyError {
    fn from(e: ParseError) -> Self {
        TallyError::ParseError(e.to_string())
    }
}

/// Parse raw text as a command.
///
/// ```
/// use tally_commands::parser::parse;
///
/// let cmd = parse(r#"/alert BTC ">50000""#).unwrap();
/// assert_eq!(cmd.name, "alert");
/// assert_eq!(cmd.args, vec!["BTC", ">50000"]);
/// ```
pub fn parse(raw: &str) -> Result<CommandInvocation, ParseError> {
    let trimmed = raw.trim();
    let (form, body) = split_prefix(trimmed).ok_or(ParseError::NotACommand)?;

    let mut tokens = tokenize(body).into_iter();
    let name = match tokens.next() {
        Some(name) if !name.is_empty() => name.to_lowercase(),
        _ => return Err(ParseError::MissingName),
    };

    Ok(CommandInvocation {
        name,
        args: tokens.collect(),
        raw: trimmed.to_string(),
        form,
    })
}

fn split_prefix(input: &str) -> Option<(InvocationForm, &str)> {
    if let Some(rest) = input.strip_prefix('/') {
        return Some((InvocationForm::Slash, rest));
    }

    let head = input.get(..MENTION_PREFIX.len())?;
    if !head.eq_ignore_ascii_case(MENTION_PREFIX) {
        return None;
    }
    let rest = &input[MENTION_PREFIX.len()..];
    // `@systemd` is a different mention.
    match rest.chars().next() {
        None => Some((InvocationForm::Mention, rest)),
        Some(c) if c.is_whitespace() => Some((InvocationForm::Mention, rest)),
        Some(_) => None,
    }
}

/// Split an argument string into tokens, honouring quoted spans.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    // A quoted span produces a token even when empty.
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for ch in input.chars() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                in_token = true;
            }
            None if ch.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(ch);
                in_token = true;
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    tokens
}
