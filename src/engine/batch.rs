//! Ordered write batches and the merge operator.

use crate::changelog::{ChangelogRecord, RecordKind};

/// Separator the string-append merge operator puts between operands.
pub const MERGE_DELIMITER: u8 = b',';

/// Combines an existing value with a merge operand.
pub trait MergeOperator: Send + Sync {
    /// Value after merging `operand` into `existing` (`None` when the key
    /// has no live value).
    fn merge(&self, existing: Option<&[u8]>, operand: &[u8]) -> Vec<u8>;
}

/// Appends operands separated by [`MERGE_DELIMITER`]: `"1"` merged with
/// `"2"` gives `"1,2"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringAppendOperator;

impl MergeOperator for StringAppendOperator {
    fn merge(&self, existing: Option<&[u8]>, operand: &[u8]) -> Vec<u8> {
        match existing {
            Some(base) => {
                let mut out = Vec::with_capacity(base.len() + 1 + operand.len());
                out.extend_from_slice(base);
                out.push(MERGE_DELIMITER);
                out.extend_from_slice(operand);
                out
            }
            None => operand.to_vec(),
        }
    }
}

/// One mutation of a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put {
        column_family: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        column_family: String,
        key: Vec<u8>,
    },
    Merge {
        column_family: String,
        key: Vec<u8>,
        operand: Vec<u8>,
    },
}

impl BatchOp {
    pub fn column_family(&self) -> &str {
        match self {
            BatchOp::Put { column_family, .. }
            | BatchOp::Delete { column_family, .. }
            | BatchOp::Merge { column_family, .. } => column_family,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key, .. } | BatchOp::Merge { key, .. } => {
                key
            }
        }
    }

    fn size(&self) -> usize {
        let payload = match self {
            BatchOp::Put { value, .. } => value.len(),
            BatchOp::Delete { .. } => 0,
            BatchOp::Merge { operand, .. } => operand.len(),
        };
        self.column_family().len() + self.key().len() + payload
    }
}

impl From<ChangelogRecord> for BatchOp {
    fn from(record: ChangelogRecord) -> Self {
        let ChangelogRecord {
            kind,
            key,
            value,
            column_family,
        } = record;
        match kind {
            RecordKind::Put => BatchOp::Put {
                column_family,
                key,
                value: value.unwrap_or_default(),
            },
            RecordKind::Delete => BatchOp::Delete { column_family, key },
            RecordKind::Merge => BatchOp::Merge {
                column_family,
                key,
                operand: value.unwrap_or_default(),
            },
        }
    }
}

/// Mutations applied to the engine atomically with respect to readers, in
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    bytes: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, op: BatchOp) {
        self.bytes += op.size();
        self.ops.push(op);
    }

    pub fn put(&mut self, column_family: &str, key: &[u8], value: &[u8]) {
        self.push(BatchOp::Put {
            column_family: column_family.to_owned(),
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    pub fn delete(&mut self, column_family: &str, key: &[u8]) {
        self.push(BatchOp::Delete {
            column_family: column_family.to_owned(),
            key: key.to_vec(),
        });
    }

    pub fn merge(&mut self, column_family: &str, key: &[u8], operand: &[u8]) {
        self.push(BatchOp::Merge {
            column_family: column_family.to_owned(),
            key: key.to_vec(),
            operand: operand.to_vec(),
        });
    }

    /// Append an already built operation.
    pub fn append(&mut self, op: BatchOp) {
        self.push(op);
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Approximate payload bytes.
    pub fn size_bytes(&self) -> usize {
        self.bytes
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.bytes = 0;
    }
}
