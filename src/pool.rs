//! A bounded connection pool for multi-worker use.
//!
//! The pool keeps between `min` and `max` open connections. Workers call
//! [`Pool::acquire`] for exclusive ownership of a connection and hand it
//! back with [`Pool::release`]; an exhausted pool blocks acquirers on a
//! condition variable until a release arrives. A maintenance thread closes
//! connections that sat idle longer than the timeout and refills the pool
//! to its minimum. The thread holds only a weak reference, so dropping the
//! pool shuts it down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::conn::{Conn, ConnStatus};
use crate::error::{Error, Result};
use crate::logging::LogLevel;

struct IdleConn {
    conn: Conn,
    released_at: Instant,
}

struct PoolState {
    /// Idle connections, oldest release first.
    idle: VecDeque<IdleConn>,
    /// Number of connections created and not yet closed.
    n: usize,
    closed: bool,
}

struct PoolShared {
    conn_str: String,
    min: usize,
    max: usize,
    idle_timeout: Duration,
    debug: AtomicBool,
    state: Mutex<PoolState>,
    cond: Condvar,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // A panic while holding the lock leaves consistent-enough state
        // (counters and a list); keep serving rather than poisoning forever.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log(&self, msg: &std::fmt::Arguments<'_>) {
        if self.debug.load(Ordering::Relaxed) {
            log::debug!(target: "pgsql::pool", "{}", msg);
        }
    }
}

macro_rules! pool_log {
    ($shared:expr, $($arg:tt)*) => {
        $shared.log(&format_args!($($arg)*))
    };
}

/// A pool of connections safely usable from any number of worker threads.
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    /// Create a pool over `conn_str` holding between `min` and `max`
    /// connections, closing connections idle longer than `idle_timeout`.
    ///
    /// `min` connections are opened up front, so a bad connection string
    /// fails here rather than at the first acquire.
    pub fn new(conn_str: &str, min: usize, max: usize, idle_timeout: Duration) -> Result<Pool> {
        if min < 1 {
            return Err(Error::Pool("min connections must be >= 1".into()));
        }
        if max < min {
            return Err(Error::Pool("max connections must be >= min".into()));
        }
        if idle_timeout < Duration::from_secs(5) {
            return Err(Error::Pool("idle timeout must be >= 5 seconds".into()));
        }

        let mut idle = VecDeque::with_capacity(min);
        for _ in 0..min {
            let conn = Conn::connect(conn_str, LogLevel::Error)?;
            idle.push_back(IdleConn {
                conn,
                released_at: Instant::now(),
            });
        }

        let shared = Arc::new(PoolShared {
            conn_str: conn_str.to_string(),
            min,
            max,
            idle_timeout,
            debug: AtomicBool::new(false),
            state: Mutex::new(PoolState {
                n: min,
                idle,
                closed: false,
            }),
            cond: Condvar::new(),
        });

        let weak = Arc::downgrade(&shared);
        thread::spawn(move || maintenance(weak));

        Ok(Pool { shared })
    }

    /// Print pool activity to the log sink.
    pub fn set_debug(&self, debug: bool) {
        self.shared.debug.store(debug, Ordering::Relaxed);
    }

    /// Take exclusive ownership of a connection.
    ///
    /// Reuses an idle connection when one exists, opens a fresh one while
    /// under `max`, and otherwise blocks until a connection is released.
    /// Fails once the pool is closed.
    pub fn acquire(&self) -> Result<Conn> {
        let shared = &self.shared;
        let mut state = shared.lock();

        if state.closed {
            return Err(Error::Pool("pool is closed".into()));
        }

        if let Some(entry) = state.idle.pop_front() {
            pool_log!(
                shared,
                "connection acquired: {} idle, {} unused",
                state.idle.len(),
                shared.max - state.n
            );
            return Ok(entry.conn);
        }

        if state.n < shared.max {
            // Reserve the slot before connecting so the pool never exceeds
            // max, then connect without holding the lock.
            state.n += 1;
            drop(state);

            match Conn::connect(&shared.conn_str, LogLevel::Error) {
                Ok(conn) => {
                    pool_log!(shared, "connection created");
                    return Ok(conn);
                }
                Err(e) => {
                    let mut state = shared.lock();
                    state.n -= 1;
                    shared.cond.notify_one();
                    return Err(e);
                }
            }
        }

        loop {
            state = shared
                .cond
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
            if state.closed {
                return Err(Error::Pool("pool is closed".into()));
            }
            if let Some(entry) = state.idle.pop_front() {
                pool_log!(
                    shared,
                    "connection acquired after wait: {} idle",
                    state.idle.len()
                );
                return Ok(entry.conn);
            }
        }
    }

    /// Return an acquired connection to the pool and wake one waiter.
    ///
    /// A connection that disconnected while in use is dropped instead of
    /// being parked; the maintenance thread restores the minimum.
    pub fn release(&self, mut conn: Conn) {
        let shared = &self.shared;
        let mut state = shared.lock();

        if state.closed {
            return;
        }

        if conn.status() == ConnStatus::Disconnected {
            state.n -= 1;
            pool_log!(shared, "broken connection dropped: {} created", state.n);
            return;
        }

        conn.reset_for_pool();
        state.idle.push_back(IdleConn {
            conn,
            released_at: Instant::now(),
        });
        pool_log!(
            shared,
            "connection released: {} idle, {} unused",
            state.idle.len(),
            shared.max - state.n
        );
        shared.cond.notify_one();
    }

    /// Close every idle connection and refuse further acquisition.
    ///
    /// Returns an error if connections are still checked out, or when the
    /// pool was already closed.
    pub fn close(&self) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.lock();

        if state.closed {
            return Err(Error::Pool("pool already closed".into()));
        }

        state.closed = true;
        while let Some(mut entry) = state.idle.pop_front() {
            let _ = entry.conn.close();
            state.n -= 1;
        }
        shared.cond.notify_all();
        pool_log!(shared, "pool closed: {} connections outstanding", state.n);

        if state.n > 0 {
            return Err(Error::Pool(format!(
                "pool closed but {} connections in use",
                state.n
            )));
        }
        Ok(())
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if !state.closed {
            state.closed = true;
            while let Some(mut entry) = state.idle.pop_front() {
                let _ = entry.conn.close();
                state.n -= 1;
            }
            self.shared.cond.notify_all();
        }
    }
}

/// Close expired idle connections, refill to `min`, and sleep until the
/// oldest remaining idle connection would expire.
fn maintenance(weak: Weak<PoolShared>) {
    loop {
        let Some(shared) = weak.upgrade() else {
            return;
        };

        let mut delay = shared.idle_timeout;
        {
            let mut state = shared.lock();
            if state.closed {
                return;
            }

            let now = Instant::now();
            loop {
                match state.idle.front() {
                    Some(front) if now.duration_since(front.released_at) > shared.idle_timeout => {
                        if let Some(mut entry) = state.idle.pop_front() {
                            let _ = entry.conn.close();
                            state.n -= 1;
                            pool_log!(shared, "idle connection closed: {} created", state.n);
                        }
                    }
                    Some(front) => {
                        // Wake when the now-oldest entry would expire.
                        delay = shared.idle_timeout - now.duration_since(front.released_at)
                            + Duration::from_secs(1);
                        break;
                    }
                    None => break,
                }
            }

            let mut added = 0;
            while state.n < shared.min {
                match Conn::connect(&shared.conn_str, LogLevel::Error) {
                    Ok(conn) => {
                        state.idle.push_back(IdleConn {
                            conn,
                            released_at: Instant::now(),
                        });
                        state.n += 1;
                        added += 1;
                    }
                    Err(_) => {
                        pool_log!(shared, "can't create connection");
                        break;
                    }
                }
            }
            if added > 0 {
                shared.cond.notify_all();
            }
        }

        // Sleep without pinning the pool, so dropping it ends the task.
        drop(shared);
        thread::sleep(delay);
    }
}
