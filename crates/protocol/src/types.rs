use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Auxiliary parameters passed to the transfer client when a new object is
/// created inside a container.
pub type UploadParams = serde_json::Map<String, serde_json::Value>;

/// Where the bytes of an [`Item`] come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ItemSource {
    /// A file on the local filesystem.
    File { path: PathBuf },
    /// Bytes held in memory.
    Inline { data: Vec<u8> },
}

/// One unit of content to upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub name: String,
    pub size: u64,
    pub source: ItemSource,
    /// Identifier assigned by the remote side once the item is stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl Item {
    /// Creates an item backed by a local file of known size.
    pub fn from_file(name: impl Into<String>, path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            source: ItemSource::File { path: path.into() },
            remote_id: None,
        }
    }

    /// Creates an item from in-memory bytes.
    pub fn inline(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: data.len() as u64,
            source: ItemSource::Inline { data },
            remote_id: None,
        }
    }

    /// Returns `true` once the remote side has assigned an identifier.
    pub fn is_uploaded(&self) -> bool {
        self.remote_id.is_some()
    }
}

/// How items are placed at the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DestinationKind {
    /// A new remote object is created per item inside the destination.
    #[default]
    Container,
    /// The destination itself receives the item's content.
    SingleTarget,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => f.write_str("container"),
            Self::SingleTarget => f.write_str("single-target"),
        }
    }
}

/// The remote container or single target object items are uploaded into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub id: String,
    pub kind: DestinationKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl Destination {
    /// A container destination: one new object per item.
    pub fn container(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DestinationKind::Container,
            name: String::new(),
        }
    }

    /// A single target whose content is replaced.
    pub fn single_target(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DestinationKind::SingleTarget,
            name: String::new(),
        }
    }

    /// Sets a human-readable name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_field_names() {
        let mut item = Item::from_file("a.txt", "/tmp/a.txt", 10);
        item.remote_id = Some("r1".into());
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["name"], "a.txt");
        assert_eq!(json["size"], 10);
        assert_eq!(json["source"]["kind"], "file");
        assert_eq!(json["source"]["path"], "/tmp/a.txt");
        assert_eq!(json["remoteId"], "r1");
    }

    #[test]
    fn item_omits_missing_remote_id() {
        let item = Item::inline("b.bin", b"xyz".to_vec());
        let json = serde_json::to_string(&item).unwrap();
        assert!(!json.contains("remoteId"));
        assert!(json.contains("\"kind\":\"inline\""));
        assert_eq!(item.size, 3);
        assert!(!item.is_uploaded());
    }

    #[test]
    fn destination_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&DestinationKind::SingleTarget).unwrap(),
            "\"single-target\""
        );
        assert_eq!(
            serde_json::to_string(&DestinationKind::Container).unwrap(),
            "\"container\""
        );
        assert_eq!(DestinationKind::SingleTarget.to_string(), "single-target");
    }

    #[test]
    fn destination_parses_without_name() {
        let json = r#"{"id":"folder-1","kind":"container"}"#;
        let dest: Destination = serde_json::from_str(json).unwrap();
        assert_eq!(dest, Destination::container("folder-1"));
    }
}
