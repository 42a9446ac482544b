use crate::model::{Batch, Row};

/// Accumulates decoded rows and seals an exact-size batch the moment the
/// threshold is reached. Rows are never dropped or reordered; the buffer is
/// empty again before the next append is accepted.
#[derive(Debug)]
pub struct BatchBuffer {
    rows: Vec<Row>,
    capacity: usize,
}

impl BatchBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rows: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns the sealed batch exactly when this append fills the buffer.
    pub fn append(&mut self, row: Row) -> Option<Batch> {
        self.rows.push(row);
        if self.rows.len() == self.capacity {
            let rows = std::mem::replace(&mut self.rows, Vec::with_capacity(self.capacity));
            Some(Batch::new(rows))
        } else {
            None
        }
    }

    /// Seals whatever remains as a short batch; used when a file completes
    /// mid-batch and the flush-partial policy is enabled.
    pub fn take_partial(&mut self) -> Option<Batch> {
        if self.rows.is_empty() {
            return None;
        }
        let rows = std::mem::replace(&mut self.rows, Vec::with_capacity(self.capacity));
        Some(Batch::new(rows))
    }

    /// Drops the unsealed remainder, returning how many rows were discarded.
    pub fn discard(&mut self) -> usize {
        let dropped = self.rows.len();
        self.rows.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
