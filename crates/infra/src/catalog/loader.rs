use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{CatalogError, QueryCatalog, Statement};

/// Extension a file must have to be picked up as a statement.
pub const SQL_EXTENSION: &str = "sql";

/// Byte-order mark some SQL editors (pgAdmin) prepend when saving as UTF-8.
const BOM: char = '\u{feff}';

pub(super) fn load(root: &Path) -> Result<QueryCatalog, CatalogError> {
    if !root.is_dir() {
        return Err(CatalogError::MissingRoot(root.to_path_buf()));
    }

    let mut tables = HashMap::new();

    for table_dir in sorted_entries(root)? {
        if !table_dir.is_dir() {
            continue;
        }

        let table = table_key(&table_dir)?;
        let mut statements = Vec::new();

        for file in sorted_entries(&table_dir)? {
            if !is_sql_file(&file) {
                continue;
            }
            let name = file_name(&file).unwrap_or_default().to_string();
            let sql = read_statement(&file)?;
            debug!(table = %table, file = %name, "loaded query");
            statements.push(Statement { name, sql });
        }

        if statements.is_empty() {
            continue;
        }

        info!(table = %table, statements = statements.len(), "loaded query set");
        tables.insert(table, statements);
    }

    Ok(QueryCatalog { tables })
}

/// Visible entries of `dir`, sorted by file name.
///
/// Dot-prefixed entries are skipped (editor swap files, `.git`, ...).
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let io_err = |source| CatalogError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if file_name(&path).is_some_and(|n| n.starts_with('.')) {
            continue;
        }
        paths.push(path);
    }
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn table_key(dir: &Path) -> Result<String, CatalogError> {
    file_name(dir)
        .map(str::to_string)
        .ok_or_else(|| CatalogError::InvalidTableName(dir.to_path_buf()))
}

fn is_sql_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == SQL_EXTENSION)
}

fn read_statement(path: &Path) -> Result<String, CatalogError> {
    let bytes = fs::read(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text =
        String::from_utf8(bytes).map_err(|_| CatalogError::InvalidEncoding(path.to_path_buf()))?;

    Ok(match text.strip_prefix(BOM) {
        Some(rest) => rest.to_string(),
        None => text,
    })
}
