use std::collections::HashMap;
use thiserror::Error;

use crate::matrix::Matrix;
use crate::relation::Table;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Name already in use: {0}")]
    NameInUse(String),

    #[error("No such table: {0}")]
    NoSuchTable(String),

    #[error("No such matrix: {0}")]
    NoSuchMatrix(String),

    #[error("No table or matrix named {0}")]
    NoSuchObject(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// A loaded object: the catalog is the only place that needs to treat tables
/// and matrices uniformly.
pub enum Entry {
    Table(Table),
    Matrix(Matrix),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::Table(table) => &table.name,
            Entry::Matrix(matrix) => &matrix.name,
        }
    }
}

/// Process-wide registry of loaded tables and matrices. Names are unique
/// across both kinds. The catalog starts empty and is mutated only by load,
/// assignment, unload and rename.
#[derive(Default)]
pub struct Catalog {
    entries: HashMap<String, Entry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Fail early when a LOAD or assignment target name is taken.
    pub fn reserve(&self, name: &str) -> CatalogResult<()> {
        if self.contains(name) {
            return Err(CatalogError::NameInUse(name.to_string()));
        }
        Ok(())
    }

    pub fn insert_table(&mut self, table: Table) -> CatalogResult<()> {
        self.reserve(&table.name)?;
        self.entries.insert(table.name.clone(), Entry::Table(table));
        Ok(())
    }

    pub fn insert_matrix(&mut self, matrix: Matrix) -> CatalogResult<()> {
        self.reserve(&matrix.name)?;
        self.entries
            .insert(matrix.name.clone(), Entry::Matrix(matrix));
        Ok(())
    }

    pub fn table(&self, name: &str) -> CatalogResult<&Table> {
        match self.entries.get(name) {
            Some(Entry::Table(table)) => Ok(table),
            _ => Err(CatalogError::NoSuchTable(name.to_string())),
        }
    }

    pub fn table_mut(&mut self, name: &str) -> CatalogResult<&mut Table> {
        match self.entries.get_mut(name) {
            Some(Entry::Table(table)) => Ok(table),
            _ => Err(CatalogError::NoSuchTable(name.to_string())),
        }
    }

    pub fn matrix(&self, name: &str) -> CatalogResult<&Matrix> {
        match self.entries.get(name) {
            Some(Entry::Matrix(matrix)) => Ok(matrix),
            _ => Err(CatalogError::NoSuchMatrix(name.to_string())),
        }
    }

    pub fn matrix_mut(&mut self, name: &str) -> CatalogResult<&mut Matrix> {
        match self.entries.get_mut(name) {
            Some(Entry::Matrix(matrix)) => Ok(matrix),
            _ => Err(CatalogError::NoSuchMatrix(name.to_string())),
        }
    }

    pub fn remove(&mut self, name: &str) -> CatalogResult<Entry> {
        self.entries
            .remove(name)
            .ok_or_else(|| CatalogError::NoSuchObject(name.to_string()))
    }

    /// Re-key an entry after the object itself has been renamed.
    pub fn reinsert(&mut self, entry: Entry) {
        self.entries.insert(entry.name().to_string(), entry);
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .values()
            .filter_map(|entry| match entry {
                Entry::Table(table) => Some(table.name.clone()),
                Entry::Matrix(_) => None,
            })
            .collect();
        names.sort();
        names
    }

    pub fn matrix_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .values()
            .filter_map(|entry| match entry {
                Entry::Matrix(matrix) => Some(matrix.name.clone()),
                Entry::Table(_) => None,
            })
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn table(name: &str) -> Table {
        Table::new(name, Path::new("/data"))
    }

    fn matrix(name: &str) -> Matrix {
        Matrix::new(name, Path::new("/data"))
    }

    #[test]
    fn test_names_unique_across_kinds() {
        let mut catalog = Catalog::new();
        catalog.insert_table(table("A")).unwrap();
        assert!(matches!(
            catalog.insert_matrix(matrix("A")),
            Err(CatalogError::NameInUse(_))
        ));
    }

    #[test]
    fn test_kind_mismatch_is_an_error() {
        let mut catalog = Catalog::new();
        catalog.insert_table(table("T")).unwrap();
        catalog.insert_matrix(matrix("M")).unwrap();

        assert!(catalog.table("T").is_ok());
        assert!(matches!(
            catalog.table("M"),
            Err(CatalogError::NoSuchTable(_))
        ));
        assert!(matches!(
            catalog.matrix("T"),
            Err(CatalogError::NoSuchMatrix(_))
        ));
    }

    #[test]
    fn test_remove_then_reuse_name() {
        let mut catalog = Catalog::new();
        catalog.insert_table(table("T")).unwrap();
        catalog.remove("T").unwrap();
        assert!(!catalog.contains("T"));
        catalog.insert_matrix(matrix("T")).unwrap();
        assert!(catalog.matrix("T").is_ok());
    }

    #[test]
    fn test_listings_are_sorted_by_kind() {
        let mut catalog = Catalog::new();
        catalog.insert_table(table("B")).unwrap();
        catalog.insert_table(table("A")).unwrap();
        catalog.insert_matrix(matrix("Z")).unwrap();

        assert_eq!(catalog.table_names(), ["A", "B"]);
        assert_eq!(catalog.matrix_names(), ["Z"]);
    }
}
