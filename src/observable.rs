//! Push-based observable values.
//!
//! An [`Observable<T>`] holds the latest value and pushes replacements to
//! every [`Subscription<T>`]. A new subscriber always receives the current
//! value first, then every later replacement (intermediate values may be
//! skipped when the subscriber is slower than the publisher).
//!
//! # Example
//!
//! ```ignore
//! let state = Observable::new(0);
//! let mut sub = state.subscribe();
//!
//! state.publish(1);
//!
//! // In the UI task
//! while let Some(value) = sub.next().await {
//!     render(value);
//! }
//! ```

use tokio::sync::watch;

/// Publisher side: owns the latest value
#[derive(Debug)]
pub struct Observable<T> {
  tx: watch::Sender<T>,
}

impl<T: Clone> Observable<T> {
  pub fn new(initial: T) -> Self {
    let (tx, _rx) = watch::channel(initial);
    Self { tx }
  }

  /// Replace the current value and notify subscribers.
  pub fn publish(&self, value: T) {
    self.tx.send_replace(value);
  }

  /// Build the next value from the current one and publish it.
  pub fn replace_with(&self, f: impl FnOnce(&T) -> T) {
    self.tx.send_modify(|current| {
      let next = f(current);
      *current = next;
    });
  }

  /// Clone of the current value.
  pub fn current(&self) -> T {
    self.tx.borrow().clone()
  }

  pub fn subscribe(&self) -> Subscription<T> {
    Subscription {
      rx: self.tx.subscribe(),
      delivered_initial: false,
    }
  }

  pub fn subscriber_count(&self) -> usize {
    self.tx.receiver_count()
  }
}

/// Subscriber side. Dropping it (or calling `unsubscribe`) ends the subscription.
#[derive(Debug)]
pub struct Subscription<T> {
  rx: watch::Receiver<T>,
  delivered_initial: bool,
}

impl<T: Clone> Subscription<T> {
  /// Latest value, without waiting.
  pub fn latest(&self) -> T {
    self.rx.borrow().clone()
  }

  /// Wait for the next value.
  ///
  /// The first call returns the current value immediately. Returns `None`
  /// once the observable has been dropped.
  pub async fn next(&mut self) -> Option<T> {
    if !self.delivered_initial {
      self.delivered_initial = true;
      return Some(self.rx.borrow_and_update().clone());
    }

    match self.rx.changed().await {
      Ok(()) => Some(self.rx.borrow_and_update().clone()),
      Err(_) => None,
    }
  }

  pub fn unsubscribe(self) {}
}

impl<T> Clone for Subscription<T> {
  fn clone(&self) -> Self {
    Self {
      rx: self.rx.clone(),
      delivered_initial: false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn test_new_subscriber_gets_latest_value_first() {
    let observable = Observable::new(1);
    observable.publish(2);
    observable.publish(3);

    let mut sub = observable.subscribe();
    assert_eq!(sub.next().await, Some(3));
  }

  #[tokio::test]
  async fn test_subscriber_receives_replacements() {
    let observable = Observable::new("idle".to_string());
    let mut sub = observable.subscribe();
    assert_eq!(sub.next().await.as_deref(), Some("idle"));

    observable.publish("syncing".to_string());
    assert_eq!(sub.next().await.as_deref(), Some("syncing"));

    observable.replace_with(|prev| format!("{}-done", prev));
    assert_eq!(sub.next().await.as_deref(), Some("syncing-done"));
  }

  #[tokio::test]
  async fn test_next_waits_for_change() {
    let observable = Observable::new(0);
    let mut sub = observable.subscribe();
    sub.next().await;

    let pending = tokio::time::timeout(Duration::from_millis(20), sub.next()).await;
    assert!(pending.is_err());
  }

  #[tokio::test]
  async fn test_dropped_observable_ends_stream() {
    let observable = Observable::new(0);
    let mut sub = observable.subscribe();
    sub.next().await;
    drop(observable);
    assert_eq!(sub.next().await, None);
  }

  #[test]
  fn test_unsubscribe_releases_receiver() {
    let observable = Observable::new(0);
    let sub = observable.subscribe();
    assert_eq!(observable.subscriber_count(), 1);
    sub.unsubscribe();
    assert_eq!(observable.subscriber_count(), 0);
  }
}
