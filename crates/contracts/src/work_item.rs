//! WorkItem - unit of work handed to rendering workers
//!
//! Also carries the row type of the aggregate queue-count query, since both
//! describe entries of the publish queue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::TargetId;

/// Identifier of a publishable object (page, folder, file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ItemId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// One unit of work: the object to render plus the auxiliary attributes
/// needed to render it.
///
/// Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Object to render
    pub id: ItemId,
    /// Publish target the rendered object is written to
    pub target: TargetId,
    /// Auxiliary render attributes (name -> value)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl WorkItem {
    /// Create a work item without attributes
    pub fn new(id: impl Into<ItemId>, target: impl Into<TargetId>) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Look up an attribute value
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Object type code of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjType(pub u32);

impl ObjType {
    pub const FOLDER: ObjType = ObjType(10002);
    pub const PAGE: ObjType = ObjType(10007);
    pub const FILE: ObjType = ObjType(10008);
    pub const IMAGE: ObjType = ObjType(10011);
    pub const FORM: ObjType = ObjType(10050);
}

impl fmt::Display for ObjType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::FOLDER => f.write_str("folder"),
            Self::PAGE => f.write_str("page"),
            Self::FILE => f.write_str("file"),
            Self::IMAGE => f.write_str("image"),
            Self::FORM => f.write_str("form"),
            ObjType(code) => write!(f, "objtype-{code}"),
        }
    }
}

/// Action recorded for a publish queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    Create,
    Modify,
    Move,
    Online,
    Offline,
    Hide,
    Remove,
    Delete,
}

impl QueueAction {
    /// Terminal/removal actions never count towards "to publish"
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Delete | Self::Hide | Self::Remove | Self::Offline
        )
    }
}

/// One row of the grouped queue-count query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCountRow {
    pub target: TargetId,
    pub obj_type: ObjType,
    pub action: QueueAction,
    pub delayed: bool,
    pub count: u64,
}
