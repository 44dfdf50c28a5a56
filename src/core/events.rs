//! Typed event subscriptions
//!
//! An [`Emitter`] delivers one event type to its listeners in registration
//! order. Everything runs on the caller's thread: emitting is synchronous
//! and a listener has returned before `emit` does.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::{error, warn};

type Listener<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Registry<T: ?Sized> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

pub struct Emitter<T: ?Sized> {
    name: &'static str,
    registry: Rc<RefCell<Registry<T>>>,
}

impl<T: ?Sized + 'static> Emitter<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            registry: Rc::new(RefCell::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, listener: impl FnMut(&T) + 'static) -> Subscription {
        let mut registry = self.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        let listener: Listener<T> = Rc::new(RefCell::new(listener));
        registry.listeners.push((id, listener));

        let weak: Weak<RefCell<Registry<T>>> = Rc::downgrade(&self.registry);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.borrow_mut().listeners.retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    /// Deliver `event` to every listener, returning how many completed.
    ///
    /// A panicking listener is logged and skipped; the others still run.
    pub fn emit(&self, event: &T) -> usize {
        // Snapshot so listeners may subscribe or unsubscribe while running
        let listeners: Vec<Listener<T>> = self
            .registry
            .borrow()
            .listeners
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();

        let mut delivered = 0;
        for listener in listeners {
            let Ok(mut callback) = listener.try_borrow_mut() else {
                warn!("Skipping re-entrant {} listener", self.name);
                continue;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| (&mut *callback)(event))) {
                Ok(()) => delivered += 1,
                Err(_) => error!("A {} listener panicked", self.name),
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.registry.borrow().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every listener
    pub fn clear(&self) {
        // Take first so listener destructors never run under the borrow
        let listeners = std::mem::take(&mut self.registry.borrow_mut().listeners);
        drop(listeners);
    }
}

/// Handle to a registered listener; dropping it unsubscribes
#[must_use = "dropping a Subscription removes the listener"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    /// Keep the listener for as long as its emitter lives
    pub fn detach(mut self) {
        self.remove = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let emitter: Emitter<str> = Emitter::new("data");
        let seen = Rc::new(RefCell::new(Vec::new()));

        let subscriptions: Vec<Subscription> = (0..3)
            .map(|i| {
                let seen = Rc::clone(&seen);
                emitter.subscribe(move |data: &str| seen.borrow_mut().push(format!("{i}:{data}")))
            })
            .collect();

        assert_eq!(emitter.emit("x"), 3);
        assert_eq!(*seen.borrow(), vec!["0:x", "1:x", "2:x"]);
        drop(subscriptions);
        assert!(emitter.is_empty());
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let emitter: Emitter<u32> = Emitter::new("resize");
        let hits = Rc::new(RefCell::new(0));

        let _bad = emitter.subscribe(|_| panic!("listener failure"));
        let good = {
            let hits = Rc::clone(&hits);
            emitter.subscribe(move |n| *hits.borrow_mut() += n)
        };

        assert_eq!(emitter.emit(&2), 1);
        assert_eq!(emitter.emit(&3), 1);
        assert_eq!(*hits.borrow(), 5);
        good.unsubscribe();
        assert_eq!(emitter.len(), 1);
    }

    #[test]
    fn test_detach_keeps_listener() {
        let emitter: Emitter<u32> = Emitter::new("title");
        let hits = Rc::new(RefCell::new(0));
        {
            let hits = Rc::clone(&hits);
            emitter.subscribe(move |_| *hits.borrow_mut() += 1).detach();
        }

        emitter.emit(&0);
        assert_eq!(*hits.borrow(), 1);

        emitter.clear();
        emitter.emit(&0);
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn test_unsubscribe_after_emitter_dropped() {
        let emitter: Emitter<u32> = Emitter::new("data");
        let subscription = emitter.subscribe(|_| {});
        drop(emitter);
        subscription.unsubscribe();
    }
}
