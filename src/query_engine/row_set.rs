use crate::common::Row;

/// Rows produced by a select, handed out once and in order.
///
/// The rows are read in full when the select runs, so the set is a snapshot:
/// writes made while it is consumed, such as an insert into the table being
/// read, never show up in it.
#[derive(Debug)]
pub struct RowSet {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Row>,
}

impl RowSet {
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
        }
    }

    /// Column names of the source table, in table order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Iterator for RowSet {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for RowSet {}
