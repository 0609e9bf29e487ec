//! Single-settlement result cell.
//!
//! Several independent tasks may try to finish one operation; only the first
//! [`Settler::settle`] is delivered, every later call is a no-op that returns
//! `false`.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Write side of a settlement. Clone it into every task that may settle.
#[derive(Debug)]
pub struct Settler<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Settler<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Settler<T> {
    /// Settles with `value` if nothing has settled yet.
    ///
    /// Returns `true` only for the write that won and was observed by the
    /// receiver.
    pub fn settle(&self, value: T) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            return false;
        };
        tx.send(value).is_ok()
    }

    pub fn is_settled(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// Creates a settlement. The receiver errors only if every [`Settler`] is
/// dropped without settling.
pub fn settlement<T>() -> (Settler<T>, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Settler {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_write_wins() {
        let (settler, rx) = settlement();
        let other = settler.clone();

        assert!(settler.settle(1));
        assert!(!other.settle(2));
        assert!(other.is_settled());
        assert_eq!(rx.await, Ok(1));
    }

    #[tokio::test]
    async fn racing_tasks_settle_exactly_once() {
        for _ in 0..64 {
            let (settler, rx) = settlement();
            let tasks: Vec<_> = (0..4)
                .map(|n| {
                    let settler = settler.clone();
                    tokio::spawn(async move { settler.settle(n) })
                })
                .collect();
            drop(settler);

            let mut wins = 0;
            for task in tasks {
                wins += usize::from(task.await.unwrap());
            }
            assert_eq!(wins, 1);
            assert!(rx.await.is_ok());
        }
    }

    #[tokio::test]
    async fn abandoned_when_every_settler_drops() {
        let (settler, rx) = settlement::<()>();
        drop(settler);
        assert!(rx.await.is_err());
    }
}
