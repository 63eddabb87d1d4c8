use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::QuartzResult;
use crate::engine::engine;
use crate::execution::operator::{AbstractOperator, DescriptionMode};
use crate::storage::Table;

/// Resolves a table by name from the storage manager.
pub struct GetTable {
    table_name: String,
    output: Mutex<Option<Arc<Table>>>,
}

impl GetTable {
    pub fn new(table_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            table_name: table_name.into(),
            output: Mutex::new(None),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl AbstractOperator for GetTable {
    fn name(&self) -> &'static str {
        "GetTable"
    }

    fn description(&self, _mode: DescriptionMode) -> String {
        format!("GetTable ({})", self.table_name)
    }

    fn execute(&self) -> QuartzResult<()> {
        let table = engine().storage_manager().get_table(&self.table_name)?;
        *self.output.lock() = Some(table);
        Ok(())
    }

    fn get_output(&self) -> Arc<Table> {
        self.output
            .lock()
            .clone()
            .expect("operator must execute before get_output")
    }

    fn deep_copy(&self) -> Arc<dyn AbstractOperator> {
        GetTable::new(self.table_name.clone())
    }
}
