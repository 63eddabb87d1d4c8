use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::{QuartzError, QuartzResult};
use crate::storage::table::Table;

/// Process-wide registry of named tables.
#[derive(Debug, Default)]
pub struct StorageManager {
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, name: impl Into<String>, table: Arc<Table>) -> QuartzResult<()> {
        let name = name.into();
        let mut tables = self.tables.write();
        if tables.contains_key(&name) {
            return Err(QuartzError::Storage(format!(
                "a table named '{name}' already exists"
            )));
        }
        tables.insert(name, table);
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> QuartzResult<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QuartzError::Storage(format!("no table named '{name}'")))
    }

    pub fn drop_table(&self, name: &str) -> QuartzResult<()> {
        self.tables
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| QuartzError::Storage(format!("no table named '{name}'")))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Drop every registered table. Used by the engine reset hook.
    pub fn clear(&self) {
        self.tables.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::table::{TableColumnDefinition, TableType};
    use crate::types::DataType;

    fn empty_table() -> Arc<Table> {
        Arc::new(Table::new(
            vec![TableColumnDefinition::new("a", DataType::Int, false)],
            TableType::Data,
            16,
        ))
    }

    #[test]
    fn test_add_get_drop() {
        let manager = StorageManager::new();
        manager.add_table("t", empty_table()).unwrap();
        assert!(manager.has_table("t"));
        assert!(manager.add_table("t", empty_table()).is_err());
        assert!(manager.get_table("t").is_ok());
        manager.drop_table("t").unwrap();
        assert!(manager.get_table("t").is_err());
    }
}
