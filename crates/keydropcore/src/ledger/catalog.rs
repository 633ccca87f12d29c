//! Resource catalog: which ids exist and which file backs each one

use std::path::Path;

/// One catalog entry, e.g. `codm` backed by `CODM.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: String,
    pub file_name: String,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_lowercase(),
            file_name: file_name.into().trim().to_string(),
        }
    }

    /// Button label: the file name without its extension.
    pub fn label(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .unwrap_or(self.id.as_str())
    }
}

/// Ordered list of resources. Order is the menu order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Builds a catalog from `(id, file)` pairs.
    ///
    /// A later entry whose id or backing file repeats an earlier one is
    /// skipped: two ids over one file would each get their own lock and
    /// could hand out the same lines twice.
    pub fn from_pairs<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        let mut catalog = Catalog::default();
        for (id, file) in pairs {
            let entry = CatalogEntry::new(id, file);
            if entry.id.is_empty() || catalog.get(&entry.id).is_some() {
                continue;
            }
            if let Some(owner) = catalog.owner_of(&entry.file_name) {
                log::warn!(
                    "Resource '{}' reuses {} of '{}', skipping it",
                    entry.id,
                    entry.file_name,
                    owner.id
                );
                continue;
            }
            catalog.entries.push(entry);
        }
        catalog
    }

    /// Catalog configured through `RESOURCES`, or the default categories.
    pub fn from_env() -> Self {
        Self::from_pairs(crate::core::config::resources::CATALOG.iter().cloned())
    }

    /// Case-insensitive lookup.
    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        let id = id.trim();
        self.entries.iter().find(|entry| entry.id.eq_ignore_ascii_case(id))
    }

    /// Entry already backed by `file_name`, compared case-insensitively.
    fn owner_of(&self, file_name: &str) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|entry| entry.file_name.eq_ignore_ascii_case(file_name))
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let catalog = Catalog::from_pairs([("CODM", "CODM.txt"), ("gmail", "Gmail.txt")]);
        assert_eq!(catalog.get("codm").map(|e| e.file_name.as_str()), Some("CODM.txt"));
        assert_eq!(catalog.get(" Gmail ").map(|e| e.id.as_str()), Some("gmail"));
        assert!(catalog.get("roblox").is_none());
    }

    #[test]
    fn test_duplicates_keep_first() {
        let catalog = Catalog::from_pairs([("codm", "CODM.txt"), ("CODM", "Other.txt")]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.entries()[0].file_name, "CODM.txt");
    }

    #[test]
    fn test_shared_file_keeps_first_id() {
        let catalog = Catalog::from_pairs([
            ("codm", "CODM.txt"),
            ("cod", "codm.TXT"),
            ("gmail", "Gmail.txt"),
        ]);
        let ids: Vec<&str> = catalog.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["codm", "gmail"]);
        assert!(catalog.get("cod").is_none());
    }

    #[test]
    fn test_label_is_file_stem() {
        assert_eq!(CatalogEntry::new("codm", "CODM.txt").label(), "CODM");
        assert_eq!(CatalogEntry::new("misc", "").label(), "misc");
    }
}
