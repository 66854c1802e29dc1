//! Current-value subjects with synchronous fan-out.
//!
//! An [`Observable`] always holds a value. Subscribing delivers that value
//! immediately, and every later [`Observable::next`] reaches all live
//! subscribers before it returns. Listeners run outside the internal lock, so
//! a listener may publish to any observable, including the one notifying it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ObservableState<T> {
    value: T,
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
    completed: bool,
}

struct ObservableInner<T> {
    state: Mutex<ObservableState<T>>,
}

impl<T> ObservableInner<T> {
    fn lock(&self) -> MutexGuard<'_, ObservableState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Observable")
            .field("subscribers", &state.listeners.len())
            .field("completed", &state.completed)
            .finish()
    }
}

impl<T: Default + Clone + Send + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(ObservableInner {
                state: Mutex::new(ObservableState {
                    value: initial,
                    next_id: 0,
                    listeners: Vec::new(),
                    completed: false,
                }),
            }),
        }
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Replace the value and notify subscribers. Ignored once completed.
    pub fn next(&self, value: T) {
        let (value, listeners) = {
            let mut state = self.inner.lock();
            if state.completed {
                return;
            }
            state.value = value;
            (state.value.clone(), Self::listeners_of(&state))
        };
        for listener in listeners {
            listener(&value);
        }
    }

    /// Atomically derive the next value from the current one, then notify.
    pub fn update<F>(&self, f: F) -> T
    where
        F: FnOnce(&T) -> T,
    {
        let (value, listeners) = {
            let mut state = self.inner.lock();
            if state.completed {
                return state.value.clone();
            }
            state.value = f(&state.value);
            (state.value.clone(), Self::listeners_of(&state))
        };
        for listener in listeners {
            listener(&value);
        }
        value
    }

    /// Register a listener; it is invoked right away with the current value.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let listener: Listener<T> = Arc::new(listener);
        let (id, current) = {
            let mut state = self.inner.lock();
            if state.completed {
                return Subscription::detached();
            }
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.push((id, Arc::clone(&listener)));
            (id, state.value.clone())
        };
        listener(&current);

        let weak: Weak<ObservableInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().listeners.retain(|(existing, _)| *existing != id);
            }
        })
    }

    /// Drop every listener and freeze the current value.
    pub fn complete(&self) {
        let mut state = self.inner.lock();
        state.completed = true;
        state.listeners.clear();
    }

    pub fn is_completed(&self) -> bool {
        self.inner.lock().completed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    fn listeners_of(state: &ObservableState<T>) -> Vec<Listener<T>> {
        state
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

/// Handle that removes its listener when dropped or explicitly unsubscribed.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Collects every value an observable emits, starting with the current one.
#[cfg(test)]
pub(crate) fn record<T: Clone + Send + 'static>(
    observable: &Observable<T>,
) -> (Arc<Mutex<Vec<T>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = observable.subscribe(move |value: &T| {
        sink.lock().unwrap().push(value.clone());
    });
    (seen, subscription)
}
