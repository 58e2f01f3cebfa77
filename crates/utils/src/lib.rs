pub mod log;
pub mod rw_lock;

pub use rw_lock::{LockError, ReadGuard, ReadWriteLock, WriteGuard};
