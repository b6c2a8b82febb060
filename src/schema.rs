//! Schema Catalog: enumerates baseline and migration CQL files for a
//! keyspace.
//!
//! Directly descended from the teacher's `MigrationRunner::load_migrations`
//! (scan a directory, keep `.cql` files, sort by filename) generalized to
//! two independent directories per keyspace, matching the original
//! `schemaDir` decorator which drove both `DB.baseline` and
//! `DB.migrateSchema` off the same directory-scan logic.

use std::path::{Path, PathBuf};

use tracing::debug;

/// One `.cql` file discovered in a catalog directory.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Absolute path to the file.
    pub path: PathBuf,
    /// The file's basename, e.g. `"users.cql"` or
    /// `"002_add_sessions.cql"`.
    pub filename: String,
}

impl CatalogEntry {
    /// For baseline files, the table the file is named after (basename
    /// without the `.cql` extension).
    pub fn table_name(&self) -> &str {
        self.filename.strip_suffix(".cql").unwrap_or(&self.filename)
    }
}

/// The catalog for a single keyspace: an ordered list of baseline files and
/// an ordered list of migration files.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub baseline: Vec<CatalogEntry>,
    pub migrations: Vec<CatalogEntry>,
}

/// Load the catalog for `keyspace` rooted at `root`.
///
/// Reads `<root>/<keyspace>/baseline/*.cql` and
/// `<root>/<keyspace>/schema_migrations/*.cql`. A missing directory yields
/// an empty sequence rather than an error. Files not ending in `.cql` are
/// skipped with a log line. Ordering is purely by sorted basename (ASCII
/// byte-wise, via `str`'s `Ord`).
pub fn load_catalog(root: &Path, keyspace: &str) -> Catalog {
    let keyspace_root = root.join(keyspace);
    Catalog {
        baseline: scan_cql_dir(&keyspace_root.join("baseline")),
        migrations: scan_cql_dir(&keyspace_root.join("schema_migrations")),
    }
}

fn scan_cql_dir(dir: &Path) -> Vec<CatalogEntry> {
    if !dir.is_dir() {
        debug!(?dir, "catalog directory not found, treating as empty");
        return Vec::new();
    }

    let mut entries = Vec::new();
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            debug!(?dir, error = %e, "failed to read catalog directory");
            return Vec::new();
        }
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if filename.ends_with(".cql") {
            entries.push(CatalogEntry { path, filename });
        } else {
            debug!(file = %filename, "skipping non-CQL file");
        }
    }

    entries.sort_by(|a, b| a.filename.cmp(&b.filename));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str) {
        fs::write(dir.join(name), "-- noop").unwrap();
    }

    #[test]
    fn missing_keyspace_dir_yields_empty_catalog() {
        let root = tempfile::tempdir().unwrap();
        let catalog = load_catalog(root.path(), "authdb");
        assert!(catalog.baseline.is_empty());
        assert!(catalog.migrations.is_empty());
    }

    #[test]
    fn loads_and_sorts_baseline_files() {
        let root = tempfile::tempdir().unwrap();
        let baseline = root.path().join("authdb").join("baseline");
        fs::create_dir_all(&baseline).unwrap();
        write(&baseline, "users.cql");
        write(&baseline, "orgs.cql");
        write(&baseline, "README.md");

        let catalog = load_catalog(root.path(), "authdb");
        let names: Vec<_> = catalog.baseline.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, vec!["orgs.cql", "users.cql"]);
    }

    #[test]
    fn table_name_strips_extension() {
        let entry = CatalogEntry {
            path: PathBuf::from("/x/users.cql"),
            filename: "users.cql".to_string(),
        };
        assert_eq!(entry.table_name(), "users");
    }

    #[test]
    fn migration_files_sorted_lexicographically() {
        let root = tempfile::tempdir().unwrap();
        let migrations = root.path().join("authdb").join("schema_migrations");
        fs::create_dir_all(&migrations).unwrap();
        write(&migrations, "002_add_sessions.cql");
        write(&migrations, "001_create_users.cql");
        write(&migrations, "010_add_index.cql");

        let catalog = load_catalog(root.path(), "authdb");
        let names: Vec<_> = catalog.migrations.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(
            names,
            vec!["001_create_users.cql", "002_add_sessions.cql", "010_add_index.cql"]
        );
    }
}
