use std::sync::{Arc, Mutex, Weak};

type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

struct ListenerList<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

/// A list of callbacks invoked synchronously on every `notify`.
pub(crate) struct ListenerSet<T> {
    inner: Arc<Mutex<ListenerList<T>>>,
}

impl<T: Copy + 'static> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerList {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub(crate) fn add<F>(&self, listener: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = {
            let mut list = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let id = list.next_id;
            list.next_id += 1;
            list.entries.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<ListenerList<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(list) = weak.upgrade() {
                    let mut list = list.lock().unwrap_or_else(|e| e.into_inner());
                    list.entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Call every registered listener with `value`.
    ///
    /// Listeners run outside the lock, so they may subscribe or unsubscribe
    /// from inside the callback.
    pub(crate) fn notify(&self, value: T) {
        let snapshot: Vec<Listener<T>> = {
            let list = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            list.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in snapshot {
            listener(value);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }
}

/// Handle returned when registering a listener.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
