// src/processors/window.rs
use crate::record::Record;
use std::collections::VecDeque;

/// grep-style before/after context around selected records.
///
/// Every record passes through [`ContextWindow::admit`] exactly once, in
/// input order. Selected records flush the before-buffer; trailing records
/// are let through while the after-counter lasts.
#[derive(Debug)]
pub struct ContextWindow {
    before: usize,
    after: usize,
    buffer: VecDeque<Record>,
    after_remaining: usize,
    line: usize,
    last_emitted: Option<usize>,
}

impl ContextWindow {
    pub fn new(before: usize, after: usize) -> Self {
        ContextWindow {
            before,
            after,
            buffer: VecDeque::with_capacity(before),
            after_remaining: 0,
            line: 0,
            last_emitted: None,
        }
    }

    /// Admit the next record and append whatever should be printed now,
    /// including a separator record when a new region starts after a gap.
    pub fn admit(&mut self, record: Record, selected: bool, out: &mut Vec<Record>) {
        self.line += 1;

        if selected {
            self.after_remaining = self.after;
            let region_start = self.line - self.buffer.len();
            if let Some(last) = self.last_emitted {
                if (self.before > 0 || self.after > 0) && region_start.saturating_sub(last) > 1 {
                    out.push(Record::separator());
                }
            }
            out.extend(self.buffer.drain(..));
            out.push(record);
            self.last_emitted = Some(self.line);
        } else if self.after_remaining > 0 {
            self.after_remaining -= 1;
            out.push(record);
            self.last_emitted = Some(self.line);
        } else if self.before > 0 {
            self.buffer.push_back(record);
            while self.buffer.len() > self.before {
                self.buffer.pop_front();
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
