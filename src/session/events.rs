use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};

use crate::session::Identity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
}

type Listeners = Arc<Mutex<Vec<(u64, Sender<AuthEvent>)>>>;

/// Fan-out of auth events to every live `Subscription`
#[derive(Debug, Default, Clone)]
pub struct Subscribers {
    listeners: Listeners,
    next_id: Arc<AtomicU64>,
}

impl Subscribers {
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, tx));
        }
        Subscription {
            id,
            events: rx,
            listeners: Arc::clone(&self.listeners),
        }
    }

    pub fn notify(&self, event: AuthEvent) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        }
    }

    pub fn count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Receiving end of the auth state stream. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    events: Receiver<AuthEvent>,
    listeners: Listeners,
}

impl Subscription {
    pub fn try_next(&self) -> Option<AuthEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn drain(&self) -> Vec<AuthEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            uid: "uid-1".into(),
            email: "a@example.edu".into(),
            id_token: "token".into(),
        }
    }

    #[test]
    fn every_subscriber_sees_events_in_order() {
        let subscribers = Subscribers::default();
        let first = subscribers.subscribe();
        let second = subscribers.subscribe();

        subscribers.notify(AuthEvent::SignedIn(identity()));
        subscribers.notify(AuthEvent::SignedOut);

        let expected = vec![AuthEvent::SignedIn(identity()), AuthEvent::SignedOut];
        assert_eq!(first.drain(), expected);
        assert_eq!(second.drain(), expected);
        assert!(first.try_next().is_none());
    }

    #[test]
    fn dropping_a_subscription_unsubscribes() {
        let subscribers = Subscribers::default();
        let kept = subscribers.subscribe();
        let dropped = subscribers.subscribe();
        assert_eq!(subscribers.count(), 2);

        drop(dropped);
        assert_eq!(subscribers.count(), 1);

        subscribers.notify(AuthEvent::SignedOut);
        assert_eq!(kept.drain(), vec![AuthEvent::SignedOut]);
    }
}
