//! Reactive queries.
//!
//! Observers register interest in a set of tables. A committed write to any
//! of those tables wakes the observer, which re-runs its query and publishes
//! the new result. Invalidation is per table, never per row: overlapping
//! observers may both re-run on one write.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::db::Store;
use crate::repo::Table;
use crate::AppError;

#[derive(Clone, Default)]
pub struct ChangeBus {
    observers: Arc<Mutex<HashMap<Table, Vec<Weak<Notify>>>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `notify` for every table in `tables`. The bus holds weak
    /// references only; dropping the last strong handle unsubscribes.
    pub fn subscribe(&self, tables: &[Table], notify: &Arc<Notify>) {
        if let Ok(mut guard) = self.observers.lock() {
            for table in tables {
                guard
                    .entry(*table)
                    .or_default()
                    .push(Arc::downgrade(notify));
            }
        }
    }

    /// Wakes each live observer of the given tables once.
    pub fn publish(&self, tables: &BTreeSet<Table>) {
        let mut woken: Vec<Arc<Notify>> = Vec::new();
        if let Ok(mut guard) = self.observers.lock() {
            for table in tables {
                if let Some(list) = guard.get_mut(table) {
                    list.retain(|weak| match weak.upgrade() {
                        Some(notify) => {
                            if !woken.iter().any(|seen| Arc::ptr_eq(seen, &notify)) {
                                woken.push(notify);
                            }
                            true
                        }
                        None => false,
                    });
                }
            }
        }
        if !woken.is_empty() {
            debug!(target: "minet", event = "live_publish", tables = ?tables, observers = woken.len());
        }
        for notify in woken {
            notify.notify_one();
        }
    }

    pub fn observer_count(&self, table: Table) -> usize {
        self.observers
            .lock()
            .map(|guard| {
                guard
                    .get(&table)
                    .map(|list| list.iter().filter(|weak| weak.strong_count() > 0).count())
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

/// Result of a live query. `Unknown` means the first run has not finished,
/// which is distinct from a finished run that returned nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
    Unknown,
    Ready(T),
    Failed(AppError),
}

impl<T> QueryState<T> {
    pub fn is_unknown(&self) -> bool {
        matches!(self, QueryState::Unknown)
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            QueryState::Ready(value) => Some(value),
            _ => None,
        }
    }
}

type QueryFn<T> = Arc<dyn Fn(Store) -> BoxFuture<'static, crate::AppResult<T>> + Send + Sync>;

/// A query that re-executes whenever one of its dependency tables is written.
/// Dropping it cancels the background task.
pub struct LiveQuery<T> {
    rx: watch::Receiver<QueryState<T>>,
    task: JoinHandle<()>,
}

impl<T> LiveQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn spawn<F, Fut>(store: &Store, deps: &[Table], query: F) -> Self
    where
        F: Fn(Store) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::AppResult<T>> + Send + 'static,
    {
        let query: QueryFn<T> = Arc::new(move |store| query(store).boxed());
        let (tx, rx) = watch::channel(QueryState::Unknown);
        let notify = Arc::new(Notify::new());
        store.bus().subscribe(deps, &notify);

        let store = store.clone();
        let task = tokio::spawn(async move {
            loop {
                let state = match query(store.clone()).await {
                    Ok(value) => QueryState::Ready(value),
                    Err(err) => QueryState::Failed(err),
                };
                if tx.send(state).is_err() {
                    break;
                }
                notify.notified().await;
            }
        });

        Self { rx, task }
    }

    pub fn current(&self) -> QueryState<T> {
        (*self.rx.borrow()).clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
        self.rx.clone()
    }

    /// Waits for the next published state that satisfies `pred`.
    pub async fn wait_for<P>(&mut self, mut pred: P) -> Option<QueryState<T>>
    where
        P: FnMut(&QueryState<T>) -> bool,
    {
        self.rx
            .wait_for(|state| pred(state))
            .await
            .ok()
            .map(|state| (*state).clone())
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_wakes_only_matching_tables() {
        let bus = ChangeBus::new();
        let contacts = Arc::new(Notify::new());
        let events = Arc::new(Notify::new());
        bus.subscribe(&[Table::Contacts], &contacts);
        bus.subscribe(&[Table::Events], &events);

        bus.publish(&BTreeSet::from([Table::Contacts]));

        assert_eq!(bus.observer_count(Table::Contacts), 1);
        assert_eq!(bus.observer_count(Table::Events), 1);
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let bus = ChangeBus::new();
        {
            let notify = Arc::new(Notify::new());
            bus.subscribe(&[Table::Reminders], &notify);
            assert_eq!(bus.observer_count(Table::Reminders), 1);
        }
        bus.publish(&BTreeSet::from([Table::Reminders]));
        assert_eq!(bus.observer_count(Table::Reminders), 0);
    }

    #[tokio::test]
    async fn observer_subscribed_to_two_tables_gets_one_permit() {
        let bus = ChangeBus::new();
        let notify = Arc::new(Notify::new());
        bus.subscribe(&[Table::Contacts, Table::Interactions], &notify);

        bus.publish(&BTreeSet::from([Table::Contacts, Table::Interactions]));
        notify.notified().await;
    }
}
