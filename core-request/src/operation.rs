//! # Operations
//!
//! [`Operation<T>`] is the unit of asynchronous work behind every provider
//! call. It binds a single-shot resolver, a single-assignment result channel,
//! a monotonic cancellation flag and a growing list of dependent
//! sub-operations.
//!
//! ## Lifecycle
//!
//! 1. [`Operation::new`] binds the resolver.
//! 2. [`Operation::run`] spawns it on the current tokio runtime and returns an
//!    [`OperationHandle`].
//! 3. The resolver's output is assigned to the result channel exactly once.
//!    If the operation was cancelled in the meantime the result is
//!    [`Error::Aborted`] whatever the resolver produced.
//! 4. [`Operation::result`] waits for the channel after finishing every
//!    sub-operation.
//!
//! ## Cancellation
//!
//! [`Operation::cancel`] is idempotent. The first call:
//!
//! 1. sets the flag and fires the cancellation token observed by HTTP
//!    transfers, on this operation and on every sub-operation,
//! 2. withdraws this operation from the provider's authorization funnel,
//!    cancelling the in-flight authorization when it was the last dependent,
//! 3. cancels every sub-operation in registration order,
//! 4. waits for completion and releases the provider reference.
//!
//! Dropping an [`OperationHandle`] that has not completed runs step 1
//! before the drop returns and the remaining steps in the background.

use crate::error::{EitherError, Error, OperationError};
use crate::provider::CloudProvider;
use async_trait::async_trait;
use bridge_traits::http::HttpCallback;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, warn, Instrument};

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        Self(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

type Resolver<T> = Box<dyn FnOnce(Operation<T>) -> BoxFuture<'static, EitherError<T>> + Send>;
type Completion<T> = Box<dyn FnOnce(EitherError<T>) + Send>;

/// Reference from an operation to the provider that issued it.
///
/// Caller-facing operations keep their provider alive; the authorization
/// operation only holds a weak reference, since the provider's funnel
/// already points at it.
enum ProviderRef {
    Strong(Arc<CloudProvider>),
    Weak(Weak<CloudProvider>),
    Released,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<T> {
    id: OperationId,
    name: &'static str,
    resolver: Mutex<Option<Resolver<T>>>,
    result: watch::Sender<Option<EitherError<T>>>,
    completions: Mutex<Vec<Completion<T>>>,
    cancelled: AtomicBool,
    cancel_started: AtomicBool,
    cancel_token: CancellationToken,
    subrequests: Mutex<Vec<Arc<dyn GenericOperation>>>,
    provider: Mutex<ProviderRef>,
}

/// Cancellable unit of asynchronous work producing an [`EitherError<T>`].
///
/// Cloning yields another reference to the same operation.
pub struct Operation<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("cancelled", &self.inner.cancelled.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<T> Operation<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Binds `resolver` to a new operation. Nothing runs until [`run`].
    ///
    /// [`run`]: Operation::run
    pub fn new<F, Fut>(name: &'static str, resolver: F) -> Self
    where
        F: FnOnce(Operation<T>) -> Fut + Send + 'static,
        Fut: Future<Output = EitherError<T>> + Send + 'static,
    {
        let (result, _) = watch::channel(None);
        let resolver: Resolver<T> = Box::new(move |operation| resolver(operation).boxed());
        Self {
            inner: Arc::new(Inner {
                id: OperationId::next(),
                name,
                resolver: Mutex::new(Some(resolver)),
                result,
                completions: Mutex::new(Vec::new()),
                cancelled: AtomicBool::new(false),
                cancel_started: AtomicBool::new(false),
                cancel_token: CancellationToken::new(),
                subrequests: Mutex::new(Vec::new()),
                provider: Mutex::new(ProviderRef::Released),
            }),
        }
    }

    /// Keeps `provider` alive until the operation finishes.
    pub fn with_provider(self, provider: Arc<CloudProvider>) -> Self {
        *lock(&self.inner.provider) = ProviderRef::Strong(provider);
        self
    }

    /// Refers to `provider` without extending its lifetime.
    pub fn with_weak_provider(self, provider: Weak<CloudProvider>) -> Self {
        *lock(&self.inner.provider) = ProviderRef::Weak(provider);
        self
    }

    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the result channel has been assigned.
    pub fn is_finished(&self) -> bool {
        self.inner.result.borrow().is_some()
    }

    /// Token fired on cancellation; long waits inside a resolver select on it.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel_token
    }

    /// Transfer callback tied to this operation's cancellation.
    pub fn http_callback(&self) -> HttpCallback {
        HttpCallback::new(self.inner.cancel_token.clone())
    }

    /// Owning provider, if it is still alive and not yet released.
    pub fn provider(&self) -> Option<Arc<CloudProvider>> {
        match &*lock(&self.inner.provider) {
            ProviderRef::Strong(provider) => Some(Arc::clone(provider)),
            ProviderRef::Weak(provider) => provider.upgrade(),
            ProviderRef::Released => None,
        }
    }

    /// Spawns the resolver.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::AlreadyRun`] on every call after the first.
    pub fn run(&self) -> Result<OperationHandle<T>, OperationError> {
        let resolver = lock(&self.inner.resolver)
            .take()
            .ok_or(OperationError::AlreadyRun)?;
        self.launch(resolver);
        Ok(OperationHandle::new(self.clone()))
    }

    /// Runs a freshly built operation.
    pub(crate) fn start(self) -> OperationHandle<T> {
        if let Some(resolver) = lock(&self.inner.resolver).take() {
            self.launch(resolver);
        }
        OperationHandle::new(self)
    }

    fn launch(&self, resolver: Resolver<T>) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(id = %self.id(), name = self.name(), "No tokio runtime to run operation");
                self.done(Err(Error::Transport("no async runtime available".to_string())));
                return;
            }
        };

        let operation = self.clone();
        let future = resolver(self.clone());
        let span = debug_span!("operation", id = %self.id(), name = self.name());
        handle.spawn(
            async move {
                let result = match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Operation resolver panicked");
                        Err(Error::InvalidResponse("operation panicked".to_string()))
                    }
                };
                let result = if operation.is_cancelled() {
                    Err(Error::Aborted)
                } else {
                    result
                };
                operation.done(result);
            }
            .instrument(span),
        );
    }

    /// Assigns the result and runs the completion callbacks.
    ///
    /// Returns false if the result was already assigned.
    fn done(&self, result: EitherError<T>) -> bool {
        let completions = {
            let mut completions = lock(&self.inner.completions);
            let mut assigned = Some(result.clone());
            let modified = self.inner.result.send_if_modified(|slot| {
                if slot.is_none() {
                    *slot = assigned.take();
                    true
                } else {
                    false
                }
            });
            if !modified {
                return false;
            }
            std::mem::take(&mut *completions)
        };
        *lock(&self.inner.provider) = ProviderRef::Released;

        match &result {
            Ok(_) => debug!(id = %self.id(), name = self.name(), "Operation completed"),
            Err(e) => debug!(id = %self.id(), name = self.name(), error = %e, "Operation failed"),
        }
        for completion in completions {
            completion(result.clone());
        }
        true
    }

    /// Invokes `callback` once with the result, immediately if it is already
    /// assigned.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(EitherError<T>) + Send + 'static,
    {
        let ready = {
            let mut completions = lock(&self.inner.completions);
            let ready = self.inner.result.borrow().clone();
            if ready.is_none() {
                completions.push(Box::new(callback));
                return;
            }
            ready
        };
        if let Some(result) = ready {
            callback(result);
        }
    }

    async fn wait(&self) -> EitherError<T> {
        let mut receiver = self.inner.result.subscribe();
        let result = match receiver.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        result.unwrap_or(Err(Error::Aborted))
    }

    /// Waits for the result and for every sub-operation, then releases the
    /// provider reference.
    pub async fn finish(&self) {
        self.wait().await;

        let mut index = 0;
        while let Some(subrequest) = self.subrequest_at(index) {
            subrequest.finish().await;
            index += 1;
        }

        *lock(&self.inner.provider) = ProviderRef::Released;
    }

    /// The operation's result once it and its sub-operations are finished.
    pub async fn result(&self) -> EitherError<T> {
        self.finish().await;
        self.wait().await
    }

    pub async fn cancel(&self) {
        self.mark_cancelled();
        if self.inner.cancel_started.swap(true, Ordering::SeqCst) {
            self.finish().await;
            return;
        }
        debug!(id = %self.id(), name = self.name(), "Cancelling operation");

        if let Some(provider) = self.provider() {
            if let Some(authorization) = provider.withdraw(self.id()) {
                debug!(
                    id = %self.id(),
                    authorization = %authorization.id(),
                    "Last dependent gone, cancelling authorization"
                );
                let authorization: Arc<dyn GenericOperation> = Arc::new(authorization);
                authorization.cancel().await;
            }
        }

        let mut index = 0;
        while let Some(subrequest) = self.subrequest_at(index) {
            subrequest.cancel().await;
            index += 1;
        }

        let never_ran = lock(&self.inner.resolver).take().is_some();
        if never_ran {
            self.done(Err(Error::Aborted));
        }

        self.finish().await;
    }

    /// Sets the cancelled flag and fires the cancellation token of this
    /// operation and of every sub-operation, without waiting for anything.
    fn mark_cancelled(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel_token.cancel();
        // a sub-operation pushed after this snapshot sees the flag in subrequest()
        let subrequests = lock(&self.inner.subrequests).clone();
        for subrequest in subrequests {
            subrequest.mark_cancelled();
        }
    }

    /// Registers a dependent operation, cancelled together with this one.
    ///
    /// A dependent of an already cancelled operation is cancelled right away.
    pub async fn subrequest(&self, operation: Arc<dyn GenericOperation>) {
        if self.is_cancelled() {
            operation.cancel().await;
            return;
        }
        lock(&self.inner.subrequests).push(Arc::clone(&operation));
        // cancel() may have walked the list before the push
        if self.is_cancelled() {
            operation.cancel().await;
        }
    }

    pub fn subrequest_count(&self) -> usize {
        lock(&self.inner.subrequests).len()
    }

    fn subrequest_at(&self, index: usize) -> Option<Arc<dyn GenericOperation>> {
        lock(&self.inner.subrequests).get(index).cloned()
    }
}

/// Type-erased view of an operation used for sub-operation trees.
#[async_trait]
pub trait GenericOperation: Send + Sync {
    fn id(&self) -> OperationId;

    fn is_cancelled(&self) -> bool;

    /// Synchronous part of [`cancel`](GenericOperation::cancel): flags the
    /// whole subtree as cancelled.
    fn mark_cancelled(&self);

    async fn cancel(&self);

    async fn finish(&self);
}

#[async_trait]
impl<T> GenericOperation for Operation<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> OperationId {
        Operation::id(self)
    }

    fn is_cancelled(&self) -> bool {
        Operation::is_cancelled(self)
    }

    fn mark_cancelled(&self) {
        Operation::mark_cancelled(self)
    }

    async fn cancel(&self) {
        Operation::cancel(self).await
    }

    async fn finish(&self) {
        Operation::finish(self).await
    }
}

/// Caller-side handle of a running operation.
///
/// Dropping the handle before the operation completes cancels it; call
/// [`detach`](OperationHandle::detach) to let it run on its own.
pub struct OperationHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    operation: Operation<T>,
    armed: bool,
}

impl<T> OperationHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(operation: Operation<T>) -> Self {
        Self {
            operation,
            armed: true,
        }
    }

    pub fn id(&self) -> OperationId {
        self.operation.id()
    }

    pub fn is_cancelled(&self) -> bool {
        self.operation.is_cancelled()
    }

    pub fn operation(&self) -> &Operation<T> {
        &self.operation
    }

    pub async fn result(&self) -> EitherError<T> {
        self.operation.result().await
    }

    pub async fn cancel(&self) {
        self.operation.cancel().await
    }

    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(EitherError<T>) + Send + 'static,
    {
        self.operation.on_complete(callback)
    }

    /// Releases the handle without cancelling the operation.
    pub fn detach(mut self) -> Operation<T> {
        self.armed = false;
        self.operation.clone()
    }
}

impl<T> fmt::Debug for OperationHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("operation", &self.operation)
            .field("armed", &self.armed)
            .finish()
    }
}

impl<T> Drop for OperationHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.armed || self.operation.is_finished() || self.operation.is_cancelled() {
            return;
        }
        self.operation.mark_cancelled();
        // funnel withdrawal and waiting for completion need the runtime
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let operation = self.operation.clone();
            handle.spawn(async move { operation.cancel().await });
        }
    }
}
