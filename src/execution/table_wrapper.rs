use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::QuartzResult;
use crate::execution::operator::AbstractOperator;
use crate::storage::Table;

/// Wraps an existing table as an operator so it can feed an operator tree.
pub struct TableWrapper {
    table: Arc<Table>,
    output: Mutex<Option<Arc<Table>>>,
}

impl TableWrapper {
    pub fn new(table: Arc<Table>) -> Arc<Self> {
        Arc::new(Self {
            table,
            output: Mutex::new(None),
        })
    }
}

impl AbstractOperator for TableWrapper {
    fn name(&self) -> &'static str {
        "TableWrapper"
    }

    fn execute(&self) -> QuartzResult<()> {
        *self.output.lock() = Some(Arc::clone(&self.table));
        Ok(())
    }

    fn get_output(&self) -> Arc<Table> {
        self.output
            .lock()
            .clone()
            .expect("operator must execute before get_output")
    }

    fn deep_copy(&self) -> Arc<dyn AbstractOperator> {
        TableWrapper::new(Arc::clone(&self.table))
    }
}
