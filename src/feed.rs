use std::sync::Arc;

use tokio::sync::watch;

/// Latest-value holder that listeners push into and callers read from,
/// either immediately or by waiting for the next push.
#[derive(Debug)]
pub struct Feed<T> {
    tx: Arc<watch::Sender<Option<Arc<T>>>>,
}

impl<T> Clone for Feed<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> Default for Feed<T> {
    fn default() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }
}

impl<T> Feed<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the held value and wakes every subscriber.
    pub fn publish(&self, value: T) {
        self.tx.send_replace(Some(Arc::new(value)));
    }

    pub fn latest(&self) -> Option<Arc<T>> {
        self.tx.borrow().clone()
    }

    /// A subscription that ignores the value held now and waits for the
    /// next one.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription { rx: self.tx.subscribe() }
    }
}

#[derive(Debug)]
pub struct Subscription<T> {
    rx: watch::Receiver<Option<Arc<T>>>,
}

impl<T> Subscription<T> {
    /// Waits for the next value pushed after the previous call (or after
    /// subscribing). Values pushed in between are skipped in favour of the
    /// newest. Returns `None` once the feed is gone.
    pub async fn next(&mut self) -> Option<Arc<T>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return Some(value);
            }
        }
    }
}
