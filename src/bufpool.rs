// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::Mutex;

const MAX_POOLED_BUFFERS: usize = 8;

/// Free-list of encode buffers, amortising allocations on the write path.
///
/// Returned buffers are cleared before being pooled again.
#[derive(Debug, Default)]
pub(crate) struct BufferPool(Mutex<Vec<Vec<u8>>>);

impl BufferPool {
    pub fn get(&self) -> Vec<u8> {
        self.0
            .lock()
            .expect("lock is poisoned")
            .pop()
            .unwrap_or_default()
    }

    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();

        let mut pool = self.0.lock().expect("lock is poisoned");
        if pool.len() < MAX_POOLED_BUFFERS {
            pool.push(buf);
        }
    }
}
