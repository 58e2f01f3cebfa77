//! Writer-priority reader/writer lock keyed by thread identity.
//!
//! Unlike `std::sync::RwLock`, this lock is advisory: it guards no data of its
//! own and only coordinates threads that agree to use it. It exists because
//! the profile cache needs a few guarantees the standard primitive does not
//! make:
//!
//! * **Writer priority.** As soon as one writer is waiting, new readers are
//!   held back until every waiting writer has had its turn.
//! * **Reentrancy by thread identity.** The active writer may acquire the
//!   write lock again (the hold is counted) and may take read holds. A thread
//!   that already reads may read again without queueing behind a waiting
//!   writer.
//! * **Cooperative interruption.** [`ReadWriteLock::interrupt`] marks a thread;
//!   if that thread is, or next becomes, blocked in an acquire it gets
//!   [`LockError::Interrupted`] instead of the lock. Any successful acquire
//!   clears the mark.
//!
//! There is no timeout and no deadlock detection. A thread that never
//! releases its hold leaves the lock unusable for everybody else.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    marker::PhantomData,
    thread::{self, ThreadId},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    #[error("interrupted while waiting for the profile lock")]
    Interrupted,
    #[error("thread holds a read lock; waiting for the write lock would deadlock")]
    UpgradeWouldDeadlock,
}

#[derive(Debug, Default)]
struct LockState {
    writer: Option<ThreadId>,
    write_holds: usize,
    readers: HashMap<ThreadId, usize>,
    waiting_writers: usize,
    interrupted: HashSet<ThreadId>,
    /// Bumped per thread by `release_all`; guards from an older epoch no
    /// longer own a hold.
    epochs: HashMap<ThreadId, u64>,
}

impl LockState {
    fn epoch(&self, thread: ThreadId) -> u64 {
        self.epochs.get(&thread).copied().unwrap_or(0)
    }

    fn take_interrupt(&mut self, thread: ThreadId) -> Result<(), LockError> {
        if self.interrupted.remove(&thread) {
            return Err(LockError::Interrupted);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ReadWriteLock {
    state: Mutex<LockState>,
    changed: Condvar,
}

impl fmt::Debug for ReadWriteLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReadWriteLock")
            .field("writer", &state.writer)
            .field("readers", &state.readers.len())
            .field("waiting_writers", &state.waiting_writers)
            .finish()
    }
}

impl ReadWriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no writer is active or waiting, then register the calling
    /// thread as a reader.
    pub fn acquire_read(&self) -> Result<ReadGuard<'_>, LockError> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.writer == Some(me) || state.readers.contains_key(&me) {
            *state.readers.entry(me).or_insert(0) += 1;
            state.interrupted.remove(&me);
            return Ok(ReadGuard::new(self, state.epoch(me)));
        }

        while state.writer.is_some() || state.waiting_writers > 0 {
            state.take_interrupt(me)?;
            self.changed.wait(&mut state);
        }

        state.readers.insert(me, 1);
        state.interrupted.remove(&me);
        Ok(ReadGuard::new(self, state.epoch(me)))
    }

    /// Block until there is neither an active writer nor any reader, then
    /// install the calling thread as the writer.
    ///
    /// Reentrant: the active writer gets another counted hold immediately.
    pub fn acquire_write(&self) -> Result<WriteGuard<'_>, LockError> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.writer == Some(me) {
            state.write_holds += 1;
            state.interrupted.remove(&me);
            return Ok(WriteGuard::new(self, state.epoch(me)));
        }
        if state.readers.contains_key(&me) {
            return Err(LockError::UpgradeWouldDeadlock);
        }

        state.waiting_writers += 1;
        while state.writer.is_some() || !state.readers.is_empty() {
            if let Err(err) = state.take_interrupt(me) {
                state.waiting_writers -= 1;
                // Readers held back by this writer may now proceed.
                self.changed.notify_all();
                return Err(err);
            }
            self.changed.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = Some(me);
        state.write_holds = 1;
        state.interrupted.remove(&me);

        Ok(WriteGuard::new(self, state.epoch(me)))
    }

    /// Drop one read hold of the calling thread.
    pub fn release_read(&self) {
        if !self.release_read_hold(None) {
            tracing::warn!("release_read called by a thread holding no read lock");
        }
    }

    /// Drop one write hold of the calling thread.
    pub fn release_write(&self) {
        if !self.release_write_hold(None) {
            tracing::warn!("release_write called by a thread that is not the writer");
        }
    }

    /// Drop every hold, read and write, of the calling thread. Guards the
    /// thread still owns become inert.
    pub fn release_all(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let mut wake = false;

        *state.epochs.entry(me).or_insert(0) += 1;

        if state.writer == Some(me) {
            state.writer = None;
            state.write_holds = 0;
            wake = true;
        }
        if state.readers.remove(&me).is_some() && state.readers.is_empty() {
            wake = true;
        }

        if wake {
            self.changed.notify_all();
        }
    }

    /// Ask `thread` to abandon its current (or next) blocking acquire. The
    /// mark is dropped once the thread acquires successfully.
    pub fn interrupt(&self, thread: ThreadId) {
        let mut state = self.state.lock();
        state.interrupted.insert(thread);
        self.changed.notify_all();
    }

    pub fn waiting_writers(&self) -> usize {
        self.state.lock().waiting_writers
    }

    pub fn reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    /// Drop one read hold. With `epoch`, only if no `release_all` ran since
    /// the hold was taken.
    fn release_read_hold(&self, epoch: Option<u64>) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if epoch.is_some_and(|epoch| epoch != state.epoch(me)) {
            return false;
        }

        let Some(holds) = state.readers.get_mut(&me) else {
            return false;
        };
        *holds -= 1;
        if *holds == 0 {
            state.readers.remove(&me);
        }

        if state.readers.is_empty() && state.waiting_writers > 0 {
            self.changed.notify_all();
        }
        true
    }

    fn release_write_hold(&self, epoch: Option<u64>) -> bool {
        let me = thread::current().id();
        let mut state: MutexGuard<'_, LockState> = self.state.lock();

        if epoch.is_some_and(|epoch| epoch != state.epoch(me)) {
            return false;
        }

        if state.writer != Some(me) {
            return false;
        }
        state.write_holds -= 1;
        if state.write_holds == 0 {
            state.writer = None;
            self.changed.notify_all();
        }
        true
    }
}

/// Read hold released on drop. Not `Send`: holds belong to the acquiring thread.
#[must_use = "the read lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a> {
    lock: &'a ReadWriteLock,
    epoch: u64,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ReadGuard<'a> {
    fn new(lock: &'a ReadWriteLock, epoch: u64) -> Self {
        Self {
            lock,
            epoch,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_read_hold(Some(self.epoch));
    }
}

/// Write hold released on drop. Not `Send`: holds belong to the acquiring thread.
#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a ReadWriteLock,
    epoch: u64,
    _not_send: PhantomData<*const ()>,
}

impl<'a> WriteGuard<'a> {
    fn new(lock: &'a ReadWriteLock, epoch: u64) -> Self {
        Self {
            lock,
            epoch,
            _not_send: PhantomData,
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_write_hold(Some(self.epoch));
    }
}
