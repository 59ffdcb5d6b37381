//! The shared async runtime behind sessions.

use std::io;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::session::Session;

/// Owns the event loop that drives every connection.
///
/// By default a single background worker thread runs the loop; all
/// connection drivers, timers and DNS lookups are spawned onto it. Each
/// connection is driven by exactly one task, so its callbacks never
/// overlap even when more workers are configured.
///
/// Dropping the service shuts the loop down; in-flight requests resolve
/// their futures with a canceled error.
#[derive(Debug)]
pub struct Service {
    runtime: Runtime,
}

impl Service {
    /// Creates a service with one background worker thread.
    pub fn new() -> io::Result<Service> {
        Self::with_workers(1)
    }

    /// Creates a service with `workers` background worker threads.
    pub fn with_workers(workers: usize) -> io::Result<Service> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .thread_name("arequests-worker")
            .enable_all()
            .build()?;
        Ok(Service { runtime })
    }

    /// Creates a session bound to this service.
    pub fn session(&self) -> Session {
        Session::new(self)
    }

    pub(crate) fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }
}
