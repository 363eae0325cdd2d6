use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{EvalError, EvalErrorKind};

/// One evaluation failure reported through the interpreter's error sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub error: EvalError,
    pub script: Option<Uuid>,
    pub node_id: u32,
    pub box_id: u32,
    pub stack_trace: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.script {
            Some(script) => write!(f, "{} (script {} node {} box {})", self.error, script.simple(), self.node_id, self.box_id),
            None => write!(f, "{} (node {} box {})", self.error, self.node_id, self.box_id),
        }
    }
}

/// Bounded diagnostic buffer; the oldest records are dropped first.
pub struct Diagnostics {
    capacity: usize,
    records: Mutex<VecDeque<Diagnostic>>,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), records: Mutex::new(VecDeque::new()) }
    }

    pub fn push(&self, diagnostic: Diagnostic) {
        let mut records = self.records.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(diagnostic);
    }

    pub fn take(&self) -> Vec<Diagnostic> {
        self.records.lock().drain(..).collect()
    }

    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, kind: EvalErrorKind) -> usize {
        self.records.lock().iter().filter(|record| record.error.kind() == kind).count()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(error: EvalError) -> Diagnostic {
        Diagnostic { error, script: None, node_id: 1, box_id: 0, stack_trace: String::new() }
    }

    #[test]
    fn capacity_drops_oldest_records() {
        let diagnostics = Diagnostics::new(2);
        diagnostics.push(record(EvalError::MissingInstance));
        diagnostics.push(record(EvalError::UnknownParameter("a".into())));
        diagnostics.push(record(EvalError::UnknownParameter("b".into())));
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics.count(EvalErrorKind::MissingInstance), 0);
        assert_eq!(diagnostics.count(EvalErrorKind::UnknownParameter), 2);
        assert_eq!(diagnostics.take().len(), 2);
        assert!(diagnostics.is_empty());
    }
}
