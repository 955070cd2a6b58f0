//! Document discovery in the documents folder.
//!
//! A document's identity is its filename stem. When several supported files
//! share a stem, the one whose format comes first in
//! [`DocumentFormat::PRIORITY`] wins (`pdf`, `docx`, `txt`, `xls`, `xlsx`);
//! ties within the same format (possible only with recursive scans) go to the
//! lexicographically smallest path. Both rules are applied on every scan, so
//! a name always resolves to the same file while the folder is unchanged.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::error::{Error, Result};
use crate::models::{Document, DocumentFormat};

/// Patterns never treated as documents: hidden files and Office lock files.
const DEFAULT_EXCLUDES: [&str; 2] = ["**/.*", "**/~$*"];

pub struct DocumentStore {
    folder: PathBuf,
    recursive: bool,
    excludes: GlobSet,
}

impl DocumentStore {
    pub fn new(config: &DocumentsConfig) -> Result<Self> {
        let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        patterns.extend(config.exclude_globs.iter().cloned());
        Ok(Self {
            folder: config.folder.clone(),
            recursive: config.recursive,
            excludes: build_globset(&patterns)?,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// All supported documents, sorted by name.
    ///
    /// A missing folder yields an empty list.
    pub fn list(&self) -> Result<Vec<Document>> {
        if !self.folder.exists() {
            warn!("documents folder {} does not exist", self.folder.display());
            return Ok(Vec::new());
        }

        let mut walker = WalkDir::new(&self.folder)
            .min_depth(1)
            .sort_by_file_name();
        if !self.recursive {
            walker = walker.max_depth(1);
        }

        let mut by_name: BTreeMap<String, Document> = BTreeMap::new();
        for entry in walker {
            let entry = entry.map_err(|e| Error::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&self.folder).unwrap_or(path);
            if self.excludes.is_match(relative) {
                continue;
            }
            let Some(doc) = to_document(path) else {
                continue;
            };

            match by_name.get(&doc.name) {
                Some(existing) if !prefer(&doc, existing) => {
                    debug!(
                        "{} shadowed by {}",
                        doc.path.display(),
                        existing.path.display()
                    );
                }
                _ => {
                    by_name.insert(doc.name.clone(), doc);
                }
            }
        }

        Ok(by_name.into_values().collect())
    }

    /// Sorted document names.
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.list()?.into_iter().map(|d| d.name).collect())
    }

    pub fn resolve(&self, name: &str) -> Result<Document> {
        self.list()?
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::NotFound(format!("document '{}'", name)))
    }

    /// Copy a file into the documents folder.
    ///
    /// Rejects unsupported extensions and names that already exist.
    pub fn import(&self, source: &Path) -> Result<Document> {
        let format = DocumentFormat::from_path(source).ok_or_else(|| {
            Error::Config(format!("unsupported file type: {}", source.display()))
        })?;
        let file_name = source
            .file_name()
            .ok_or_else(|| Error::Config(format!("not a file: {}", source.display())))?;
        let doc = Document {
            name: stem_of(source).unwrap_or_default(),
            path: self.folder.join(file_name),
            format,
        };
        if self.list()?.iter().any(|d| d.name == doc.name) {
            return Err(Error::Config(format!(
                "a document named '{}' already exists",
                doc.name
            )));
        }

        std::fs::create_dir_all(&self.folder).map_err(|e| Error::Storage(e.to_string()))?;
        std::fs::copy(source, &doc.path).map_err(|e| {
            Error::Storage(format!("cannot copy {}: {}", source.display(), e))
        })?;
        Ok(doc)
    }
}

/// True when `candidate` should replace `existing` for the same name.
fn prefer(candidate: &Document, existing: &Document) -> bool {
    (candidate.format.priority(), &candidate.path) < (existing.format.priority(), &existing.path)
}

fn to_document(path: &Path) -> Option<Document> {
    let format = DocumentFormat::from_path(path)?;
    let name = stem_of(path)?;
    Some(Document {
        name,
        path: path.to_path_buf(),
        format,
    })
}

fn stem_of(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| Error::Config(e.to_string()))?);
    }
    builder.build().map_err(|e| Error::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn store(dir: &Path, recursive: bool) -> DocumentStore {
        DocumentStore::new(&DocumentsConfig {
            folder: dir.to_path_buf(),
            recursive,
            exclude_globs: vec![],
        })
        .unwrap()
    }

    #[test]
    fn lists_supported_files_sorted_by_name() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("zeta.txt"), "z").unwrap();
        fs::write(tmp.path().join("alpha.pdf"), "a").unwrap();
        fs::write(tmp.path().join("notes.md"), "ignored").unwrap();
        fs::write(tmp.path().join(".hidden.txt"), "ignored").unwrap();
        fs::write(tmp.path().join("~$lock.docx"), "ignored").unwrap();

        let names = store(tmp.path(), true).names().unwrap();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn stem_collision_uses_priority_order() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("report.txt"), "t").unwrap();
        fs::write(tmp.path().join("report.xlsx"), "x").unwrap();
        fs::write(tmp.path().join("report.docx"), "d").unwrap();

        let s = store(tmp.path(), true);
        for _ in 0..3 {
            let doc = s.resolve("report").unwrap();
            assert_eq!(doc.format, DocumentFormat::Docx);
        }
        assert_eq!(s.list().unwrap().len(), 1);
    }

    #[test]
    fn recursion_is_configurable() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("top.txt"), "t").unwrap();
        fs::write(tmp.path().join("sub/nested.txt"), "n").unwrap();

        assert_eq!(store(tmp.path(), true).names().unwrap(), vec!["nested", "top"]);
        assert_eq!(store(tmp.path(), false).names().unwrap(), vec!["top"]);
    }

    #[test]
    fn resolve_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = store(tmp.path(), true).resolve("missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn missing_folder_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp.path().join("nope"), true);
        assert!(s.list().unwrap().is_empty());
    }

    #[test]
    fn import_copies_and_rejects_duplicates() {
        let docs = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let src = outside.path().join("guide.txt");
        fs::write(&src, "guide").unwrap();

        let s = store(docs.path(), true);
        let doc = s.import(&src).unwrap();
        assert_eq!(doc.name, "guide");
        assert!(docs.path().join("guide.txt").exists());
        assert!(matches!(s.import(&src), Err(Error::Config(_))));

        let bad = outside.path().join("image.png");
        fs::write(&bad, "png").unwrap();
        assert!(matches!(s.import(&bad), Err(Error::Config(_))));
    }
}
