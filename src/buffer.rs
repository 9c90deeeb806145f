use std::sync::{Condvar, Mutex, MutexGuard};

/// A heap-allocated intermediate buffer for received report payload.
///
/// Reports arrive with up to 255 Bytes of payload each, but we want to offer a stream-based
/// interface to the user, where arbitrarily small amounts of data can be `Read` through. This
/// type provides that interface.
///
/// Data is always kept at the front of the backing array; consuming moves the remaining Bytes
/// forward. One thread appends, one thread consumes. Concurrent consumers are not supported: the
/// streams built on top of this require reads to be serialized by the caller.
pub(crate) struct RxBuffer {
    state: Mutex<State>,
    /// Signaled when data is appended or the buffer is closed.
    readable: Condvar,
    /// Signaled when data is consumed or the buffer is closed.
    writable: Condvar,
}

struct State {
    data: Box<[u8]>,
    used: usize,
    closed: bool,
    dropped: u64,
}

impl State {
    fn free(&self) -> usize {
        self.data.len() - self.used
    }

    fn push(&mut self, payload: &[u8]) -> usize {
        let n = payload.len().min(self.free());
        self.data[self.used..self.used + n].copy_from_slice(&payload[..n]);
        self.used += n;
        n
    }

    fn take(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.used);
        out[..n].copy_from_slice(&self.data[..n]);
        self.data.copy_within(n..self.used, 0);
        self.used -= n;
        n
    }
}

impl RxBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                data: vec![0; capacity].into_boxed_slice(),
                used: 0,
                closed: false,
                dropped: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // The state is consistent after every statement, so a panicking holder leaves nothing
        // half-updated.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.lock().data.len()
    }

    pub fn len(&self) -> usize {
        self.lock().used
    }

    pub fn free_space(&self) -> usize {
        self.lock().free()
    }

    /// Returns the total number of Bytes discarded by `try_append`.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Appends as much of `payload` as fits, discarding the rest.
    ///
    /// Returns the number of Bytes appended. Nothing is appended after `close`.
    pub fn try_append(&self, payload: &[u8]) -> usize {
        let mut state = self.lock();
        if state.closed {
            return 0;
        }
        let n = state.push(payload);
        if n < payload.len() {
            let lost = payload.len() - n;
            state.dropped += lost as u64;
            log::warn!(
                "receive buffer full, dropped {} Bytes ({} total)",
                lost,
                state.dropped
            );
        }
        drop(state);

        if n > 0 {
            self.readable.notify_one();
        }
        n
    }

    /// Appends all of `payload`, waiting for the consumer to make room as needed.
    ///
    /// Returns early if the buffer gets closed, with the number of Bytes appended so far.
    pub fn append_blocking(&self, mut payload: &[u8]) -> usize {
        let mut appended = 0;
        let mut state = self.lock();
        while !payload.is_empty() && !state.closed {
            if state.free() == 0 {
                state = self
                    .writable
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
                continue;
            }
            let n = state.push(payload);
            payload = &payload[n..];
            appended += n;
            self.readable.notify_one();
        }
        appended
    }

    /// Moves up to `out.len()` Bytes into `out`, blocking while the buffer is empty.
    ///
    /// Returns 0 only if `out` is empty or the buffer is closed and drained.
    pub fn consume_blocking(&self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        let mut state = self.lock();
        while state.used == 0 && !state.closed {
            state = self
                .readable
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        let n = state.take(out);
        drop(state);

        if n > 0 {
            self.writable.notify_one();
        }
        n
    }

    /// Moves up to `out.len()` Bytes into `out` without blocking.
    pub fn try_consume(&self, out: &mut [u8]) -> usize {
        let n = self.lock().take(out);
        if n > 0 {
            self.writable.notify_one();
        }
        n
    }

    /// Closes the buffer, waking up all waiters.
    ///
    /// Already buffered data can still be consumed.
    pub fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }
}
