// src/core/catalog.rs

use crate::core::{fingerprint, metadata, paths};
use crate::models::{AppConfig, CategoryCount, ScanReport, ScanWarning, Script, ScriptFilter};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Errors that abort a whole scan. Per-folder and per-file problems are reported as
/// warnings in the [`ScanReport`] instead.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("No script folders are configured or requested.")]
    NoFolders,
}

/// Errors of single-script catalog operations.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Script '{id}' not found.")]
    NotFound { id: String },
    #[error("Could not access script file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The catalog contents. Rebuilt wholesale on every rescan.
#[derive(Debug, Default)]
struct CatalogIndex {
    /// Sorted by (name, id).
    scripts: Vec<Arc<Script>>,
    by_id: HashMap<String, Arc<Script>>,
}

impl CatalogIndex {
    fn from_scripts(mut scripts: Vec<Script>) -> Self {
        scripts.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        let scripts: Vec<Arc<Script>> = scripts.into_iter().map(Arc::new).collect();
        let by_id = scripts.iter().map(|s| (s.id.clone(), Arc::clone(s))).collect();
        Self { scripts, by_id }
    }
}

/// The in-memory index of discovered scripts.
///
/// Readers always see either the catalog before a rescan or after it, never a mix.
#[derive(Debug, Default)]
pub struct Catalog {
    index: RwLock<CatalogIndex>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rescans the configured folders plus `requested`, replacing the catalog.
    ///
    /// Configured folders come first; entries that expand to the same directory are
    /// scanned once. Requested folders are not added to the configuration.
    pub fn load_folders(
        &self,
        config: &AppConfig,
        requested: &[String],
    ) -> Result<ScanReport, ScanError> {
        let mut warnings = Vec::new();
        let roots = resolve_roots(config.script_folders.iter().chain(requested), &mut warnings);
        if roots.is_empty() && warnings.is_empty() {
            return Err(ScanError::NoFolders);
        }

        let candidates = collect_candidates(&roots, config, &mut warnings);
        log::debug!(
            "Scanning {} candidate files in {} folders.",
            candidates.len(),
            roots.len()
        );

        let parsed: Vec<Result<(Script, Vec<ScanWarning>), ScanWarning>> =
            candidates.par_iter().map(|path| load_script(path)).collect();

        let mut scripts = Vec::with_capacity(parsed.len());
        for result in parsed {
            match result {
                Ok((script, script_warnings)) => {
                    warnings.extend(script_warnings);
                    scripts.push(script);
                }
                Err(warning) => warnings.push(warning),
            }
        }

        for warning in &warnings {
            log::warn!("{}: {}", warning.path.display(), warning.message);
        }

        let next = CatalogIndex::from_scripts(scripts);
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let report = diff(&index, &next, warnings);
        *index = next;
        log::info!(
            "Catalog rescanned: {} scripts ({} added, {} removed, {} updated).",
            report.total,
            report.added.len(),
            report.removed.len(),
            report.updated.len()
        );
        Ok(report)
    }

    /// Lists scripts in catalog order, narrowed by `filter`.
    pub fn list(&self, filter: &ScriptFilter) -> Vec<Arc<Script>> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        index
            .scripts
            .iter()
            .filter(|s| match filter.category.as_deref() {
                Some(category) if !category.is_empty() => s.category_key() == category,
                _ => true,
            })
            .filter(|s| match filter.tag.as_deref() {
                Some(tag) if !tag.is_empty() => s.tags.contains(tag),
                _ => true,
            })
            .filter(|s| match &search {
                Some(needle) => matches_search(s, needle),
                None => true,
            })
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Script>> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.by_id.get(id).cloned()
    }

    /// Returns the script together with the current text of its file.
    pub fn get_with_content(&self, id: &str) -> Result<Script, CatalogError> {
        let script = self.get(id).ok_or_else(|| CatalogError::NotFound { id: id.to_string() })?;
        let bytes = fs::read(&script.path).map_err(|e| CatalogError::Io {
            path: script.path.display().to_string(),
            source: e,
        })?;
        let mut full = (*script).clone();
        full.content = Some(String::from_utf8_lossy(&bytes).into_owned());
        Ok(full)
    }

    /// Script counts per category, sorted by category name. Scripts without a
    /// category are counted under `uncategorized`.
    pub fn categories(&self) -> Vec<CategoryCount> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for script in &index.scripts {
            *counts.entry(script.category_key()).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(category, count)| CategoryCount {
                category: category.to_string(),
                count,
            })
            .collect()
    }

    /// Drops a script from the catalog, optionally deleting its file as well.
    ///
    /// The script comes back on the next rescan unless its file was deleted.
    pub fn remove(&self, id: &str, delete_file: bool) -> Result<Arc<Script>, CatalogError> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let script = index
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound { id: id.to_string() })?;

        if delete_file {
            match fs::remove_file(&script.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::warn!("Script file '{}' was already gone.", script.path.display());
                }
                Err(e) => {
                    return Err(CatalogError::Io {
                        path: script.path.display().to_string(),
                        source: e,
                    });
                }
            }
        }

        index.by_id.remove(id);
        index.scripts.retain(|s| s.id != id);
        Ok(script)
    }

    pub fn len(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .scripts
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn matches_search(script: &Script, needle: &str) -> bool {
    script.name.to_lowercase().contains(needle)
        || script.description.to_lowercase().contains(needle)
        || script.tags.iter().any(|t| t.to_lowercase().contains(needle))
}

// --- SCANNING ---

/// Expands folder entries into existing directories, in order and without duplicates.
fn resolve_roots<'a>(
    folders: impl Iterator<Item = &'a String>,
    warnings: &mut Vec<ScanWarning>,
) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut roots = Vec::new();
    for folder in folders {
        if folder.trim().is_empty() {
            continue;
        }
        let expanded = match paths::expand_folder(folder) {
            Ok(p) => p,
            Err(e) => {
                warnings.push(ScanWarning {
                    path: PathBuf::from(folder),
                    message: e.to_string(),
                });
                continue;
            }
        };
        if !expanded.is_dir() {
            warnings.push(ScanWarning {
                path: expanded,
                message: "Folder does not exist or is not a directory.".to_string(),
            });
            continue;
        }
        let normalized = paths::normalize(&expanded);
        if seen.insert(normalized.clone()) {
            roots.push(normalized);
        }
    }
    roots
}

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || name == "node_modules"
}

fn is_runnable(path: &Path, config: &AppConfig) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| config.interpreter_for(ext).is_some())
}

/// Walks every root and returns the normalized paths of runnable files, deduplicated.
fn collect_candidates(
    roots: &[PathBuf],
    config: &AppConfig,
    warnings: &mut Vec<ScanWarning>,
) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for root in roots {
        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| !is_skipped(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    let message = match e.loop_ancestor() {
                        Some(ancestor) => format!(
                            "Symlink cycle back to '{}' skipped.",
                            ancestor.display()
                        ),
                        None => e.to_string(),
                    };
                    warnings.push(ScanWarning { path, message });
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_runnable(entry.path(), config) {
                continue;
            }
            let normalized = paths::normalize(entry.path());
            if seen.insert(normalized.clone()) {
                candidates.push(normalized);
            }
        }
    }
    candidates
}

/// Reads and parses one file. A file that cannot be read is reported and skipped; a
/// file with a bad header is still catalogued.
fn load_script(path: &Path) -> Result<(Script, Vec<ScanWarning>), ScanWarning> {
    let bytes = fs::read(path).map_err(|e| ScanWarning {
        path: path.to_path_buf(),
        message: format!("Could not read file: {}", e),
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let header = metadata::parse_header(&text);

    let warnings = header
        .warnings
        .into_iter()
        .map(|message| ScanWarning {
            path: path.to_path_buf(),
            message,
        })
        .collect();

    let name = header.name.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    let script = Script {
        id: fingerprint::script_id(path),
        name,
        description: header.description,
        author: header.author,
        version: header.version,
        category: header.category,
        tags: header.tags,
        inputs: header.inputs,
        path: path.to_path_buf(),
        content: None,
        fingerprint: fingerprint::content_fingerprint(&bytes),
    };
    Ok((script, warnings))
}

fn diff(previous: &CatalogIndex, next: &CatalogIndex, warnings: Vec<ScanWarning>) -> ScanReport {
    let mut added = Vec::new();
    let mut updated = Vec::new();
    for script in &next.scripts {
        match previous.by_id.get(&script.id) {
            None => added.push(script.id.clone()),
            Some(old) if old.fingerprint != script.fingerprint => updated.push(script.id.clone()),
            Some(_) => {}
        }
    }
    let mut removed: Vec<String> = previous
        .by_id
        .keys()
        .filter(|id| !next.by_id.contains_key(*id))
        .cloned()
        .collect();
    removed.sort();

    ScanReport {
        added,
        removed,
        updated,
        total: next.scripts.len(),
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_for(folder: &Path) -> AppConfig {
        let mut config = AppConfig::new();
        config.script_folders = vec![folder.display().to_string()];
        config
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_scan_catalogs_runnable_files_only() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "hello.sh", "# @name: Hello\necho hi\n");
        write(tmp.path(), "nested/build.py", "# @category: Build\nprint(1)\n");
        write(tmp.path(), "README.md", "# docs\n");
        write(tmp.path(), ".hidden/secret.sh", "echo hidden\n");
        write(tmp.path(), "node_modules/dep/index.js", "module.exports = 1;\n");

        let catalog = Catalog::new();
        let report = catalog.load_folders(&config_for(tmp.path()), &[]).unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.added.len(), 2);
        let names: Vec<String> = catalog
            .list(&ScriptFilter::default())
            .iter()
            .map(|s| s.name.clone())
            .collect();
        assert_eq!(names, vec!["Hello".to_string(), "build".to_string()]);
    }

    #[test]
    fn test_rescan_is_idempotent_and_reports_changes() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.sh", "echo a\n");
        write(tmp.path(), "b.sh", "echo b\n");
        let config = config_for(tmp.path());
        let catalog = Catalog::new();

        catalog.load_folders(&config, &[]).unwrap();
        let first: Vec<Arc<Script>> = catalog.list(&ScriptFilter::default());

        let report = catalog.load_folders(&config, &[]).unwrap();
        assert!(report.added.is_empty() && report.removed.is_empty() && report.updated.is_empty());
        assert_eq!(catalog.list(&ScriptFilter::default()), first);

        fs::write(&a, "echo changed\n").unwrap();
        write(tmp.path(), "c.sh", "echo c\n");
        fs::remove_file(tmp.path().join("b.sh")).unwrap();
        let report = catalog.load_folders(&config, &[]).unwrap();

        assert_eq!(report.updated, vec![first[0].id.clone()]);
        assert_eq!(report.removed, vec![first[1].id.clone()]);
        assert_eq!(report.added.len(), 1);
        assert_eq!(catalog.get(&first[0].id).map(|s| s.id.clone()), Some(first[0].id.clone()));
    }

    #[test]
    fn test_malformed_header_is_catalogued_with_warning() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "broken.js", "// @inputs: [{oops\nconsole.log(1)\n");

        let catalog = Catalog::new();
        let report = catalog.load_folders(&config_for(tmp.path()), &[]).unwrap();

        assert_eq!(report.total, 1);
        assert_eq!(report.warnings.len(), 1);
        let script = &catalog.list(&ScriptFilter::default())[0];
        assert_eq!(script.name, "broken");
        assert!(script.inputs.is_empty());
    }

    #[test]
    fn test_missing_folder_is_a_warning_and_no_folders_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let catalog = Catalog::new();
        let report = catalog
            .load_folders(&config_for(&tmp.path().join("missing")), &[])
            .unwrap();
        assert_eq!(report.total, 0);
        assert_eq!(report.warnings.len(), 1);

        let mut config = AppConfig::new();
        config.script_folders.clear();
        assert!(matches!(
            catalog.load_folders(&config, &[]),
            Err(ScanError::NoFolders)
        ));
    }

    #[test]
    fn test_requested_folders_are_merged_without_duplicates() {
        let configured = TempDir::new().unwrap();
        let requested = TempDir::new().unwrap();
        write(configured.path(), "one.sh", "echo 1\n");
        write(requested.path(), "two.sh", "echo 2\n");

        let catalog = Catalog::new();
        let config = config_for(configured.path());
        let extra = vec![
            requested.path().display().to_string(),
            configured.path().display().to_string(),
        ];
        let report = catalog.load_folders(&config, &extra).unwrap();
        assert_eq!(report.total, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_is_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "sub/run.sh", "echo run\n");
        std::os::unix::fs::symlink(tmp.path(), tmp.path().join("sub").join("loop")).unwrap();

        let catalog = Catalog::new();
        let report = catalog.load_folders(&config_for(tmp.path()), &[]).unwrap();
        assert_eq!(report.total, 1);
        assert!(report.warnings.iter().any(|w| w.message.contains("cycle")));
    }

    #[test]
    fn test_filters_and_categories() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "deploy.sh",
            "# @name: Deploy\n# @category: Ops\n# @tags: [\"release\"]\necho\n",
        );
        write(
            tmp.path(),
            "lint.sh",
            "# @name: Lint\n# @description: Checks release notes\necho\n",
        );
        write(tmp.path(), "misc.sh", "echo\n");

        let catalog = Catalog::new();
        catalog.load_folders(&config_for(tmp.path()), &[]).unwrap();

        let search = ScriptFilter {
            search: Some("RELEASE".to_string()),
            ..Default::default()
        };
        assert_eq!(catalog.list(&search).len(), 2);

        let by_tag = ScriptFilter {
            tag: Some("release".to_string()),
            ..Default::default()
        };
        assert_eq!(catalog.list(&by_tag).len(), 1);

        let by_category = ScriptFilter {
            category: Some("Ops".to_string()),
            ..Default::default()
        };
        assert_eq!(catalog.list(&by_category)[0].name, "Deploy");

        assert_eq!(
            catalog.categories(),
            vec![
                CategoryCount {
                    category: "Ops".to_string(),
                    count: 1
                },
                CategoryCount {
                    category: "uncategorized".to_string(),
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn test_get_with_content_and_remove() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "x.sh", "echo x\n");
        let catalog = Catalog::new();
        catalog.load_folders(&config_for(tmp.path()), &[]).unwrap();
        let id = fingerprint::script_id(&path);

        let full = catalog.get_with_content(&id).unwrap();
        assert_eq!(full.content.as_deref(), Some("echo x\n"));

        catalog.remove(&id, true).unwrap();
        assert!(catalog.get(&id).is_none());
        assert!(!path.exists());
        assert!(matches!(
            catalog.remove(&id, false),
            Err(CatalogError::NotFound { .. })
        ));
    }
}
