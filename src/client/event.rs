//! A minimal subscription list for delivering decoded records.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Identifies one subscribed handler, for later removal.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HandlerId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// An ordered list of callbacks sharing one payload type.
///
/// Delivery is synchronous: [`emit`](Self::emit) calls every handler, in
/// subscription order, on the calling thread. In a client running
/// asynchronously that is the thread that decoded the packet, so handlers
/// should return quickly and must not block.
pub struct Event<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    next_id: u64,
    handlers: Vec<(HandlerId, Handler<T>)>,
}

impl<T> Event<T> {
    pub(super) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                handlers: Vec::new(),
            }),
        }
    }

    /// Appends a handler to the list and returns its removal token.
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> HandlerId {
        let mut inner = self.inner.lock().unwrap();
        let id = HandlerId(inner.next_id);
        inner.next_id += 1;
        inner.handlers.push((id, Arc::new(handler)));
        id
    }

    /// Removes a handler. Returns false if the token was already removed.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.handlers.len();
        inner.handlers.retain(|(handler_id, _)| *handler_id != id);
        inner.handlers.len() != before
    }

    /// Calls every handler with `payload`, in subscription order.
    pub fn emit(&self, payload: &T) {
        // Snapshot the list so handlers may subscribe or unsubscribe
        // without deadlocking; such changes take effect on the next emit.
        let handlers: Vec<Handler<T>> = {
            let inner = self.inner.lock().unwrap();
            inner.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };

        for handler in handlers {
            handler(payload);
        }
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("handlers", &self.inner.lock().unwrap().handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn handlers_run_in_subscription_order() {
        let event = Event::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let calls = Arc::clone(&calls);
            event.subscribe(move |v: &u32| calls.lock().unwrap().push((i, *v)));
        }

        event.emit(&7);

        assert_eq!(*calls.lock().unwrap(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn unsubscribe_removes_by_identity() {
        let event = Event::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let keep = {
            let calls = Arc::clone(&calls);
            event.subscribe(move |v: &u32| calls.lock().unwrap().push(*v))
        };
        let removed = event.subscribe(|_: &u32| panic!("should have been removed"));

        assert!(event.unsubscribe(removed));
        assert!(!event.unsubscribe(removed));

        event.emit(&1);
        assert_eq!(*calls.lock().unwrap(), vec![1]);

        assert!(event.unsubscribe(keep));
    }

    #[test]
    fn handlers_may_subscribe_during_emit() {
        let event = Arc::new(Event::new());
        let calls = Arc::new(Mutex::new(0));

        {
            let event = Arc::clone(&event);
            let calls = Arc::clone(&calls);
            event.clone().subscribe(move |_: &u32| {
                let calls = Arc::clone(&calls);
                event.subscribe(move |_: &u32| {
                    *calls.lock().unwrap() += 1;
                });
            });
        }

        // The nested subscription lands after the first emit, so only the
        // second emit reaches it (once; the third reaches two copies).
        event.emit(&0);
        event.emit(&0);

        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
