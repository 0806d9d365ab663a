//! Bounded, thread-based runtime for resolver requests.
//!
//! Callers hand requests to worker pools instead of running them on their own
//! thread. Identity requests and administrative bulk operations go to separate
//! pools, so a long `list_all` never queues in front of `identify` traffic,
//! and full queues are reported instead of growing without bound.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::contact::Contact;
use crate::error::{ContactError, ContactResult, ExecutionError, ValidationError};
use crate::resolver::IdentityResolver;
use crate::view::IdentityView;

/// Worker pool selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPath {
    /// `identify` requests.
    Identify,
    /// `list_all` / `clear_all`.
    Admin,
}

impl ExecutionPath {
    const fn name(self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Admin => "admin",
        }
    }
}

/// A request for the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverRequest {
    /// Resolve a submission.
    Identify {
        /// Submitted email.
        email: Option<String>,
        /// Submitted phone number.
        phone_number: Option<String>,
    },
    /// List every record.
    ListAll,
    /// Delete every record.
    ClearAll,
}

impl ResolverRequest {
    /// The pool this request runs on.
    #[must_use]
    pub const fn path(&self) -> ExecutionPath {
        match self {
            Self::Identify { .. } => ExecutionPath::Identify,
            Self::ListAll | Self::ClearAll => ExecutionPath::Admin,
        }
    }
}

/// The resolver's answer to a [`ResolverRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverResponse {
    /// Result of `Identify`.
    Identity(IdentityView),
    /// Result of `ListAll`.
    Contacts(Vec<Contact>),
    /// Result of `ClearAll`: records removed.
    Cleared(usize),
}

fn run(resolver: &IdentityResolver, request: ResolverRequest) -> ContactResult<ResolverResponse> {
    match request {
        ResolverRequest::Identify {
            email,
            phone_number,
        } => resolver
            .identify(email.as_deref(), phone_number.as_deref())
            .map(ResolverResponse::Identity),
        ResolverRequest::ListAll => resolver.list_all().map(ResolverResponse::Contacts),
        ResolverRequest::ClearAll => resolver.clear_all().map(ResolverResponse::Cleared),
    }
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct ResolverRuntimeConfig {
    /// Number of identify workers.
    pub identify_workers: usize,
    /// Number of admin workers.
    pub admin_workers: usize,
    /// Maximum queued jobs per pool.
    pub queue_capacity: usize,
}

impl Default for ResolverRuntimeConfig {
    fn default() -> Self {
        Self {
            identify_workers: 4,
            admin_workers: 1,
            queue_capacity: 1024,
        }
    }
}

impl ResolverRuntimeConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a pool would have no workers or no queue.
    pub fn validate(self) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidConfig {
            reason: reason.to_string(),
        };
        if self.identify_workers == 0 || self.admin_workers == 0 {
            return Err(invalid("every pool needs at least one worker"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be at least 1"));
        }
        Ok(self)
    }
}

enum Job {
    Execute {
        request: ResolverRequest,
        reply: Sender<ContactResult<ResolverResponse>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct WorkerPool {
    path: ExecutionPath,
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(
        path: ExecutionPath,
        workers: usize,
        queue_capacity: usize,
        resolver: &Arc<IdentityResolver>,
    ) -> ContactResult<Self> {
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut pool = Self {
            path,
            tx: Some(tx),
            workers: Vec::with_capacity(workers),
            queue_capacity,
        };
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let resolver = Arc::clone(resolver);
            let handle = thread::Builder::new()
                .name(format!("contactlink-{}-{idx}", path.name()))
                .spawn(move || worker_loop(&rx, &resolver))
                .map_err(|e| ContactError::internal(format!("failed to spawn worker: {e}")))?;
            pool.workers.push(handle);
        }
        Ok(pool)
    }

    fn try_submit(&self, job: Job) -> Result<(), ExecutionError> {
        let disconnected = || ExecutionError::Disconnected {
            path: self.path.name().to_string(),
        };
        let tx = self.tx.as_ref().ok_or_else(disconnected)?;
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExecutionError::QueueFull {
                path: self.path.name().to_string(),
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(disconnected()),
        }
    }

    /// Closes the queue; workers drain queued jobs, then exit.
    fn shutdown(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(rx: &Receiver<Job>, resolver: &IdentityResolver) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Execute { request, reply } => {
                let _ = reply.send(run(resolver, request));
            }

            #[cfg(test)]
            Job::Sleep { duration, reply } => {
                thread::sleep(duration);
                let _ = reply.send(());
            }
        }
    }
}

/// Handle returned by [`ResolverRuntime::submit`].
pub struct ExecutionHandle {
    path: ExecutionPath,
    rx: Receiver<ContactResult<ResolverResponse>>,
}

impl ExecutionHandle {
    /// The pool the request was queued on.
    #[must_use]
    pub const fn path(&self) -> ExecutionPath {
        self.path
    }

    /// Waits for the result.
    ///
    /// # Errors
    /// The request's own error, or `Disconnected` if the worker went away.
    pub fn join(self) -> ContactResult<ResolverResponse> {
        let path = self.path.name().to_string();
        self.rx
            .recv()
            .map_err(|_| ContactError::from(ExecutionError::Disconnected { path }))?
    }

    /// Waits for the result, at most `timeout`.
    ///
    /// # Errors
    /// The request's own error, `Timeout`, or `Disconnected`.
    pub fn join_timeout(self, timeout: Duration) -> ContactResult<ResolverResponse> {
        let path = self.path.name().to_string();
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ContactError::from(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => {
                ContactError::from(ExecutionError::Disconnected { path })
            }
        })?
    }
}

/// Worker pools in front of a shared [`IdentityResolver`].
pub struct ResolverRuntime {
    resolver: Arc<IdentityResolver>,
    identify: WorkerPool,
    admin: WorkerPool,
}

impl ResolverRuntime {
    /// Start the worker pools.
    ///
    /// # Errors
    /// Returns `Validation` for an invalid config, `Internal` if a worker
    /// thread cannot be spawned.
    pub fn new(resolver: IdentityResolver, config: ResolverRuntimeConfig) -> ContactResult<Self> {
        let config = config.validate()?;
        let resolver = Arc::new(resolver);
        let identify = WorkerPool::start(
            ExecutionPath::Identify,
            config.identify_workers,
            config.queue_capacity,
            &resolver,
        )?;
        let admin = WorkerPool::start(
            ExecutionPath::Admin,
            config.admin_workers,
            config.queue_capacity,
            &resolver,
        )?;
        Ok(Self {
            resolver,
            identify,
            admin,
        })
    }

    fn pool(&self, path: ExecutionPath) -> &WorkerPool {
        match path {
            ExecutionPath::Identify => &self.identify,
            ExecutionPath::Admin => &self.admin,
        }
    }

    /// Queue a request on its pool without waiting for the result.
    ///
    /// # Errors
    /// `QueueFull` if the pool's queue is at capacity.
    pub fn submit(&self, request: ResolverRequest) -> ContactResult<ExecutionHandle> {
        let path = request.path();
        let (tx, rx) = bounded::<ContactResult<ResolverResponse>>(1);
        self.pool(path).try_submit(Job::Execute { request, reply: tx })?;
        Ok(ExecutionHandle { path, rx })
    }

    /// Queue a request and wait for its result.
    ///
    /// # Errors
    /// See [`ResolverRuntime::submit`] and [`ExecutionHandle::join`].
    pub fn execute(&self, request: ResolverRequest) -> ContactResult<ResolverResponse> {
        self.submit(request)?.join()
    }

    /// The shared resolver.
    #[must_use]
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Stop accepting work, drain the queues and join every worker.
    ///
    /// Dropping the runtime does the same.
    pub fn shutdown(self) {
        drop(self);
    }

    #[cfg(test)]
    fn submit_sleep(&self, path: ExecutionPath, duration: Duration) -> ContactResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.pool(path).try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl Drop for ResolverRuntime {
    fn drop(&mut self) {
        self.identify.shutdown();
        self.admin.shutdown();
    }
}
