//! Single-resolution promise with ordered callback chains.
//!
//! A promise is created on the control loop, handed (cloned) to a pool job, and
//! settled back on the control loop when the job's [`Completion`](crate::pool::Completion)
//! is processed. Callbacks always run on the thread that settles.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::{errors::Error, Result};

type SuccessFn<T> = Box<dyn FnOnce(&T) + Send>;
type FailureFn = Box<dyn FnOnce(&str) + Send>;

enum State<T> {
    Pending,
    Resolved(Arc<T>),
    Rejected(Arc<str>),
}

struct Inner<T> {
    state: State<T>,
    on_success: Vec<SuccessFn<T>>,
    on_failure: Vec<FailureFn>,
}

enum Settled<T> {
    Resolved(Arc<T>),
    Rejected(Arc<str>),
}

pub struct Promise<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Pending,
                on_success: Vec::new(),
                on_failure: Vec::new(),
            })),
        }
    }

    /// Settle with a value and run the success chain in registration order.
    ///
    /// Fails with [`Error::AlreadySettled`] if the promise was resolved or
    /// rejected before; the stored outcome is left untouched.
    pub fn resolve(&self, value: T) -> Result<()> {
        let (value, callbacks) = {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Pending) {
                return Err(Error::AlreadySettled);
            }
            let value = Arc::new(value);
            inner.state = State::Resolved(value.clone());
            inner.on_failure.clear();
            (value, std::mem::take(&mut inner.on_success))
        };

        // Lock released: callbacks may register further callbacks on this promise.
        for cb in callbacks {
            cb(&value);
        }
        Ok(())
    }

    /// Settle with a failure reason and run the failure chain in registration order.
    pub fn reject(&self, reason: impl Into<String>) -> Result<()> {
        let (reason, callbacks) = {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Pending) {
                return Err(Error::AlreadySettled);
            }
            let reason: Arc<str> = Arc::from(reason.into());
            inner.state = State::Rejected(reason.clone());
            inner.on_success.clear();
            (reason, std::mem::take(&mut inner.on_failure))
        };

        for cb in callbacks {
            cb(&reason);
        }
        Ok(())
    }

    /// Register a success callback. Runs immediately if already resolved; never
    /// runs if rejected.
    pub fn on_success(&self, cb: impl FnOnce(&T) + Send + 'static) -> &Self {
        let settled = {
            let mut inner = self.lock();
            match self.settled(&inner) {
                None => {
                    inner.on_success.push(Box::new(cb));
                    return self;
                }
                Some(s) => s,
            }
        };

        if let Settled::Resolved(value) = settled {
            cb(&value);
        }
        self
    }

    /// Register a failure callback. Runs immediately if already rejected; never
    /// runs if resolved.
    pub fn on_failure(&self, cb: impl FnOnce(&str) + Send + 'static) -> &Self {
        let settled = {
            let mut inner = self.lock();
            match self.settled(&inner) {
                None => {
                    inner.on_failure.push(Box::new(cb));
                    return self;
                }
                Some(s) => s,
            }
        };

        if let Settled::Rejected(reason) = settled {
            cb(&reason);
        }
        self
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.lock().state, State::Pending)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.lock().state, State::Resolved(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.lock().state, State::Rejected(_))
    }

    fn settled(&self, inner: &Inner<T>) -> Option<Settled<T>> {
        match &inner.state {
            State::Pending => None,
            State::Resolved(v) => Some(Settled::Resolved(v.clone())),
            State::Rejected(r) => Some(Settled::Rejected(r.clone())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // A panicking callback never runs under the lock, so poisoning cannot
        // leave the state half-written.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
