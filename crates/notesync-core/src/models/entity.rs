//! Entity model shared by notes and groups

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Field map carried by queue entries and remote writes.
pub type Payload = Map<String, Value>;

/// Default display color for new groups.
pub const DEFAULT_GROUP_COLOR: &str = "#7f8c8d";

/// Local identifier, unique across every entity table and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(i64);

impl LocalId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Entity table, named as on the remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityTable {
    Groups,
    Notes,
}

impl EntityTable {
    /// Pull order: groups first so note references resolve.
    pub const ALL: [Self; 2] = [Self::Groups, Self::Notes];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Groups => "groups",
            Self::Notes => "notes",
        }
    }
}

impl fmt::Display for EntityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groups" | "group" => Ok(Self::Groups),
            "notes" | "note" => Ok(Self::Notes),
            other => Err(Error::InvalidInput(format!("unknown table '{other}'"))),
        }
    }
}

/// User-visible fields of a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteFields {
    pub title: String,
    pub content: String,
    /// Owning group
    pub group_id: LocalId,
}

/// User-visible fields of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupFields {
    pub name: String,
    /// Display color as `#RRGGBB`
    pub color: String,
}

/// Entity-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityFields {
    Note(NoteFields),
    Group(GroupFields),
}

impl EntityFields {
    pub const fn table(&self) -> EntityTable {
        match self {
            Self::Note(_) => EntityTable::Notes,
            Self::Group(_) => EntityTable::Groups,
        }
    }

    /// Group referenced by a note.
    pub const fn group_ref(&self) -> Option<LocalId> {
        match self {
            Self::Note(note) => Some(note.group_id),
            Self::Group(_) => None,
        }
    }

    /// Reject values the remote would refuse anyway.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Group(group) => {
                if group.name.trim().is_empty() {
                    return Err(Error::InvalidInput("group name cannot be empty".into()));
                }
                if !is_hex_color(&group.color) {
                    return Err(Error::InvalidInput(format!(
                        "group color must look like #RRGGBB, got '{}'",
                        group.color
                    )));
                }
            }
            Self::Note(note) => {
                if note.title.trim().is_empty() && note.content.trim().is_empty() {
                    return Err(Error::InvalidInput(
                        "note needs a title or some content".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Full field map used for create entries.
    pub fn to_payload(&self) -> Payload {
        let value = match self {
            Self::Note(note) => json!({
                "title": note.title,
                "content": note.content,
                "group_id": note.group_id,
            }),
            Self::Group(group) => json!({
                "name": group.name,
                "color": group.color,
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => Payload::new(),
        }
    }

    /// Fields of `next` that differ from `self`, keyed as in [`Self::to_payload`].
    pub fn diff(&self, next: &Self) -> Payload {
        let current = self.to_payload();
        let mut changed = Payload::new();
        for (key, value) in next.to_payload() {
            if current.get(&key) != Some(&value) {
                changed.insert(key, value);
            }
        }
        changed
    }

    /// Apply a partial change set, returning the new field values.
    pub fn apply(&self, changes: &EntityChanges) -> Result<Self> {
        match (self, changes) {
            (Self::Note(note), EntityChanges::Note(change)) => Ok(Self::Note(NoteFields {
                title: change.title.clone().unwrap_or_else(|| note.title.clone()),
                content: change.content.clone().unwrap_or_else(|| note.content.clone()),
                group_id: change.group_id.unwrap_or(note.group_id),
            })),
            (Self::Group(group), EntityChanges::Group(change)) => Ok(Self::Group(GroupFields {
                name: change
                    .name
                    .as_deref()
                    .map_or_else(|| group.name.clone(), |name| name.trim().to_string()),
                color: change
                    .color
                    .as_deref()
                    .map_or_else(
                        || group.color.clone(),
                        |color| color.trim().to_ascii_lowercase(),
                    ),
            })),
            _ => Err(Error::InvalidInput(format!(
                "changes do not apply to {}",
                self.table()
            ))),
        }
    }
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value.chars().skip(1).all(|ch| ch.is_ascii_hexdigit())
}

/// Partial update of a note; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub group_id: Option<LocalId>,
}

/// Partial update of a group; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupChanges {
    pub name: Option<String>,
    pub color: Option<String>,
}

/// Partial update for either entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityChanges {
    Note(NoteChanges),
    Group(GroupChanges),
}

/// A note or group as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub local_id: LocalId,
    /// Assigned by the remote on first successful push
    pub remote_id: Option<String>,
    pub version: i64,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete flag
    pub is_deleted: bool,
    pub fields: EntityFields,
}

impl Entity {
    pub const fn table(&self) -> EntityTable {
        self.fields.table()
    }

    /// User-visible state for history and conflict comparison.
    pub fn snapshot(&self) -> super::Snapshot {
        super::Snapshot {
            fields: self.fields.clone(),
            is_deleted: self.is_deleted,
        }
    }

    /// Whether both sides show the user the same thing.
    pub fn same_content(&self, other: &Self) -> bool {
        self.fields == other.fields && self.is_deleted == other.is_deleted
    }

    pub fn as_group(&self) -> Option<&GroupFields> {
        match &self.fields {
            EntityFields::Group(group) => Some(group),
            EntityFields::Note(_) => None,
        }
    }

    pub fn as_note(&self) -> Option<&NoteFields> {
        match &self.fields {
            EntityFields::Note(note) => Some(note),
            EntityFields::Group(_) => None,
        }
    }

    /// Short label for list output.
    pub fn label(&self) -> &str {
        match &self.fields {
            EntityFields::Note(note) if !note.title.trim().is_empty() => &note.title,
            EntityFields::Note(note) => note.content.lines().next().unwrap_or(""),
            EntityFields::Group(group) => &group.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn group(name: &str, color: &str) -> EntityFields {
        EntityFields::Group(GroupFields {
            name: name.to_string(),
            color: color.to_string(),
        })
    }

    #[test]
    fn table_parses_singular_and_plural() {
        assert_eq!("notes".parse::<EntityTable>().unwrap(), EntityTable::Notes);
        assert_eq!("Group".parse::<EntityTable>().unwrap(), EntityTable::Groups);
        assert!("tags".parse::<EntityTable>().is_err());
    }

    #[test]
    fn validate_rejects_bad_group_color() {
        assert!(group("Work", "#00ff00").validate().is_ok());
        assert!(group("Work", "green").validate().is_err());
        assert!(group("  ", "#00ff00").validate().is_err());
    }

    #[test]
    fn diff_lists_only_changed_fields() {
        let before = group("Work", "#00ff00");
        let after = group("Work", "#ff0000");

        let changed = before.diff(&after);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed.get("color"), Some(&json!("#ff0000")));
    }

    #[test]
    fn apply_keeps_untouched_fields() {
        let note = EntityFields::Note(NoteFields {
            title: "Groceries".to_string(),
            content: "milk".to_string(),
            group_id: LocalId::new(1),
        });
        let updated = note
            .apply(&EntityChanges::Note(NoteChanges {
                content: Some("milk, eggs".to_string()),
                ..NoteChanges::default()
            }))
            .unwrap();

        let EntityFields::Note(fields) = updated else {
            panic!("expected note fields");
        };
        assert_eq!(fields.title, "Groceries");
        assert_eq!(fields.content, "milk, eggs");
        assert_eq!(fields.group_id, LocalId::new(1));
    }

    #[test]
    fn apply_rejects_mismatched_kind() {
        let result = group("Work", "#00ff00").apply(&EntityChanges::Note(NoteChanges::default()));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn note_payload_carries_group_local_id() {
        let note = EntityFields::Note(NoteFields {
            title: "t".to_string(),
            content: String::new(),
            group_id: LocalId::new(7),
        });
        assert_eq!(note.to_payload().get("group_id"), Some(&json!(7)));
    }
}
