//! Write buffering
//!
//! Queues writes in memory until the queue reaches its size limit or the
//! flush interval has elapsed. With aggregation on, a queued write is
//! merged into an earlier one of the same kind targeting the same buckets,
//! as long as no other write touching those buckets sits between them.

use super::config::BufferOptions;
use super::driver::{Identifier, WriteOp};
use super::packer::{deep_inc, deep_set};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A queued write
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub op: WriteOp,
    pub identifiers: Vec<Identifier>,
    pub values: Map<String, Value>,
}

#[derive(Debug)]
struct BufferState {
    queue: Vec<Operation>,
    last_flush: Instant,
}

#[derive(Debug)]
pub struct WriteBuffer {
    options: BufferOptions,
    state: Mutex<BufferState>,
}

impl WriteBuffer {
    pub fn new(options: BufferOptions) -> Self {
        Self {
            options,
            state: Mutex::new(BufferState {
                queue: Vec::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    pub fn options(&self) -> &BufferOptions {
        &self.options
    }

    /// Queue an operation; returns true when a flush is due.
    pub async fn push(&self, operation: Operation) -> bool {
        let mut state = self.state.lock().await;
        if self.options.aggregate {
            merge_into(&mut state.queue, operation);
        } else {
            state.queue.push(operation);
        }

        state.queue.len() >= self.options.size.max(1)
            || state.last_flush.elapsed() >= self.options.duration
    }

    /// Take everything queued and reset the flush clock.
    pub async fn drain(&self) -> Vec<Operation> {
        let mut state = self.state.lock().await;
        state.last_flush = Instant::now();
        std::mem::take(&mut state.queue)
    }

    /// Put operations that could not be written back at the front of the
    /// queue, ahead of anything queued since they were drained.
    pub async fn requeue(&self, operations: Vec<Operation>) {
        if operations.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        let newer = std::mem::replace(&mut state.queue, operations);
        state.queue.extend(newer);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn merge_into(queue: &mut Vec<Operation>, operation: Operation) {
    for queued in queue.iter_mut().rev() {
        let same_target = queued.identifiers == operation.identifiers;
        if !same_target || queued.op != operation.op {
            let overlaps = queued
                .identifiers
                .iter()
                .any(|id| operation.identifiers.contains(id));
            if overlaps {
                break;
            }
            continue;
        }
        match operation.op {
            WriteOp::Increment => deep_inc(&mut queued.values, &operation.values),
            WriteOp::Set => deep_set(&mut queued.values, &operation.values),
        }
        return;
    }
    queue.push(operation);
}
