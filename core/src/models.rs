//! Read-model and input types shared with the service layer.

use serde::{Deserialize, Serialize};

/// Free-form metadata stored per portfolio in the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioMetadata {
    #[serde(default)]
    pub project_name: String,
    /// Design style.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub category: String,
}

/// Ledger field names, in the order new entries are written.
pub const METADATA_FIELDS: [&str; 7] = [
    "project_name",
    "description",
    "area",
    "date",
    "size",
    "location",
    "category",
];

impl PortfolioMetadata {
    /// `(field, value)` pairs in [`METADATA_FIELDS`] order.
    pub fn fields(&self) -> [(&'static str, &str); 7] {
        [
            ("project_name", self.project_name.as_str()),
            ("description", self.description.as_str()),
            ("area", self.area.as_str()),
            ("date", self.date.as_str()),
            ("size", self.size.as_str()),
            ("location", self.location.as_str()),
            ("category", self.category.as_str()),
        ]
    }

    pub(crate) fn field_mut(&mut self, name: &str) -> Option<&mut String> {
        match name {
            "project_name" => Some(&mut self.project_name),
            "description" => Some(&mut self.description),
            "area" => Some(&mut self.area),
            "date" => Some(&mut self.date),
            "size" => Some(&mut self.size),
            "location" => Some(&mut self.location),
            "category" => Some(&mut self.category),
            _ => None,
        }
    }
}

/// Partial metadata: `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl MetadataUpdate {
    /// Provided fields only, in [`METADATA_FIELDS`] order.
    pub fn provided(&self) -> Vec<(&'static str, &str)> {
        [
            ("project_name", &self.project_name),
            ("description", &self.description),
            ("area", &self.area),
            ("date", &self.date),
            ("size", &self.size),
            ("location", &self.location),
            ("category", &self.category),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.provided().is_empty()
    }

    /// Full metadata for a new entry; omitted fields are empty.
    pub fn into_metadata(self) -> PortfolioMetadata {
        PortfolioMetadata {
            project_name: self.project_name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            area: self.area.unwrap_or_default(),
            date: self.date.unwrap_or_default(),
            size: self.size.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            category: self.category.unwrap_or_default(),
        }
    }
}

/// One image of a listed portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// File name inside the folder, e.g. `1.jpg`.
    pub name: String,
    /// Public URL path, e.g. `/assets/img/portfolio/w3/1.jpg`.
    pub path: String,
}

/// A folder joined with its ledger entry. Built on every list, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioItem {
    /// Display title, `Portfolio <N>`.
    pub name: String,
    pub folder: String,
    pub images: Vec<ImageRef>,
    #[serde(flatten)]
    pub metadata: PortfolioMetadata,
}

/// An uploaded file: the client-side name and its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }
}

/// Result of [`crate::PortfolioStore::delete_portfolio`].
///
/// The folder and the ledger entry are removed independently; the operation
/// as a whole succeeded when the folder is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub folder_deleted: bool,
    pub ledger_entry_deleted: bool,
    pub message: String,
}

impl DeleteOutcome {
    pub fn success(&self) -> bool {
        self.folder_deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn item_serializes_metadata_flat() {
        let item = PortfolioItem {
            name: "Portfolio 3".to_string(),
            folder: "w3".to_string(),
            images: vec![ImageRef {
                name: "0.jpg".to_string(),
                path: "/assets/img/portfolio/w3/0.jpg".to_string(),
            }],
            metadata: PortfolioMetadata {
                project_name: "Loft".to_string(),
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["project_name"], "Loft");
        assert_eq!(value["category"], "");
        assert_eq!(value["images"][0]["path"], "/assets/img/portfolio/w3/0.jpg");
    }

    #[test]
    fn update_lists_only_provided_fields() {
        let update = MetadataUpdate {
            area: Some("80".to_string()),
            category: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(update.provided(), vec![("area", "80"), ("category", "")]);
        assert!(!update.is_empty());
        assert!(MetadataUpdate::default().is_empty());
    }
}
