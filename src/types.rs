use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChecklistId(String);

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ItemId(String);

macro_rules! opaque_id {
    ($name:ident) => {
        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::new(raw)
            }
        }
    };
}

opaque_id!(ChecklistId);
opaque_id!(ItemId);

/// Packing state of a single item. Declaration order is the cycle order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
pub enum ItemStatus {
    #[default]
    #[serde(rename = "Not Ready", alias = "NotReady", alias = "not_ready")]
    NotReady,
    #[serde(alias = "checked")]
    Checked,
    #[serde(alias = "packed")]
    Packed,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 3] = [ItemStatus::NotReady, ItemStatus::Checked, ItemStatus::Packed];

    /// One step forward in `NotReady -> Checked -> Packed -> NotReady`.
    pub fn next(self) -> Self {
        match self {
            ItemStatus::NotReady => ItemStatus::Checked,
            ItemStatus::Checked => ItemStatus::Packed,
            ItemStatus::Packed => ItemStatus::NotReady,
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            ItemStatus::NotReady => 0,
            ItemStatus::Checked => 1,
            ItemStatus::Packed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::NotReady => "Not Ready",
            ItemStatus::Checked => "Checked",
            ItemStatus::Packed => "Packed",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|ch| !matches!(ch, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "notready" => Ok(ItemStatus::NotReady),
            "checked" => Ok(ItemStatus::Checked),
            "packed" => Ok(ItemStatus::Packed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub status: ItemStatus,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ItemStatus::NotReady,
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Checklist {
    pub id: ChecklistId,
    pub name: String,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl Checklist {
    pub fn new(id: impl Into<ChecklistId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn with_items(mut self, items: Vec<Item>) -> Self {
        self.items = items;
        self
    }

    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn item_mut(&mut self, id: &ItemId) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| &item.id == id)
    }

    pub fn packed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Packed)
            .count()
    }
}

impl From<String> for ChecklistId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<String> for ItemId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Bearer token for the remote checklist service.
#[derive(Clone, Eq, PartialEq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}
