//! Static command catalog.
//!
//! [`CommandRegistry`] maps command names and aliases to [`CommandMetadata`].
//! It is built once at startup and never mutated. Every name and alias is
//! unique across the whole registry; construction fails otherwise.

use std::collections::HashMap;

use serde::Serialize;

use tally_types::{Role, TallyError};

/// Every command the core knows how to route. Handlers match on this, never
/// on the command string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Help,
    Echo,
    Quote,
    Alert,
    Alerts,
    Watch,
    Unwatch,
    News,
    Ask,
    Mute,
    Kick,
    Purge,
}

/// Metadata for one registered command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandMetadata {
    pub name: String,
    pub aliases: Vec<String>,
    /// Human-readable argument shape, e.g. `<symbol> <condition>`.
    pub arg_signature: String,
    pub description: String,
    /// Minimum role needed to run the command.
    pub permission: Role,
    pub kind: CommandKind,
}

impl CommandMetadata {
    pub fn new(
        kind: CommandKind,
        name: &str,
        aliases: &[&str],
        arg_signature: &str,
        description: &str,
        permission: Role,
    ) -> Self {
        Self {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            arg_signature: arg_signature.to_string(),
            description: description.to_string(),
            permission,
            kind,
        }
    }

    /// `/name <args>` as shown in help output.
    pub fn usage(&self) -> String {
        if self.arg_signature.is_empty() {
            format!("/{}", self.name)
        } else {
            format!("/{} {}", self.name, self.arg_signature)
        }
    }

    /// The name followed by every alias.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

fn builtin_table() -> Vec<CommandMetadata> {
    use CommandKind::*;
    vec![
        CommandMetadata::new(
            Help,
            "help",
            &["h", "?"],
            "",
            "List the commands you can run",
            Role::Member,
        ),
        CommandMetadata::new(
            Echo,
            "echo",
            &[],
            "<text...>",
            "Repeat the arguments back",
            Role::Member,
        ),
        CommandMetadata::new(
            Quote,
            "quote",
            &["q", "price"],
            "<symbol...>",
            "Latest price for one or more symbols",
            Role::Member,
        ),
        CommandMetadata::new(
            Alert,
            "alert",
            &["a"],
            "<symbol> <condition>",
            "Notify the room when a price condition is met",
            Role::Member,
        ),
        CommandMetadata::new(
            Alerts,
            "alerts",
            &["al"],
            "",
            "List active price alerts in this room",
            Role::Member,
        ),
        CommandMetadata::new(
            Watch,
            "watch",
            &["w", "add"],
            "<symbol...>",
            "Add symbols to the room watchlist",
            Role::Member,
        ),
        CommandMetadata::new(
            Unwatch,
            "unwatch",
            &["uw", "remove"],
            "<symbol...>",
            "Remove symbols from the room watchlist",
            Role::Member,
        ),
        CommandMetadata::new(
            News,
            "news",
            &["n"],
            "<symbol>",
            "Recent headlines for a symbol",
            Role::Member,
        ),
        CommandMetadata::new(
            Ask,
            "ask",
            &["ai"],
            "<question>",
            "Ask the assistant about the market",
            Role::Member,
        ),
        CommandMetadata::new(
            Mute,
            "mute",
            &[],
            "<member> [minutes]",
            "Silence a member in this room",
            Role::Admin,
        ),
        CommandMetadata::new(
            Kick,
            "kick",
            &["ban"],
            "<member>",
            "Remove a member from this room",
            Role::Admin,
        ),
        CommandMetadata::new(
            Purge,
            "purge",
            &[],
            "[count]",
            "Delete recent messages in this room",
            Role::Owner,
        ),
    ]
}

/// Immutable lookup table of commands.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    entries: Vec<CommandMetadata>,
    /// lower-cased name or alias -> index into `entries`
    index: HashMap<String, usize>,
}

impl CommandRegistry {
    /// Build a registry from an explicit list, in declaration order.
    ///
    /// Fails if any two entries share a name or alias (case-insensitive),
    /// or if an entry has an empty name.
    pub fn new(entries: Vec<CommandMetadata>) -> Result<Self, TallyError> {
        let mut index = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(TallyError::RegistryError(format!(
                    "command at position {i} has an empty name"
                )));
            }
            for name in entry.names() {
                let key = name.to_lowercase();
                if let Some(&prev) = index.get(&key) {
                    let owner: &CommandMetadata = &entries[prev];
                    return Err(TallyError::RegistryError(format!(
                        "'{name}' is registered by both /{} and /{}",
                        owner.name, entry.name
                    )));
                }
                index.insert(key, i);
            }
        }
        Ok(Self { entries, index })
    }

    /// The registry of built-in chat commands.
    pub fn builtin() -> Result<Self, TallyError> {
        Self::new(builtin_table())
    }

    /// Look up a command by name or alias, case-insensitively.
    pub fn find(&self, name_or_alias: &str) -> Option<&CommandMetadata> {
        self.index
            .get(&name_or_alias.to_lowercase())
            .map(|&i| &self.entries[i])
    }

    /// All commands in declaration order.
    pub fn all(&self) -> &[CommandMetadata] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Help listing of the commands `role` may run.
    pub fn help_text(&self, role: Role) -> String {
        let visible: Vec<&CommandMetadata> = self
            .entries
            .iter()
            .filter(|e| role.satisfies(e.permission))
            .collect();
        let width = visible.iter().map(|e| e.usage().len()).max().unwrap_or(0);

        let mut out = String::from("Available commands:");
        for entry in visible {
            out.push_str(&format!(
                "\n  {:<width$}  {}",
                entry.usage(),
                entry.description,
            ));
            if !entry.aliases.is_empty() {
                out.push_str(&format!(" (aliases: {})", entry.aliases.join(", ")));
            }
        }
        out
    }
}
