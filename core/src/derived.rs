//! Derived values that are re-fetched when their inputs change.
//!
//! # Design
//! Each refresh takes a `Ticket` stamped with a new generation before the
//! request goes out. When the response arrives it is stored only if no newer
//! ticket has been issued in the meantime, so an older request that
//! finishes late cannot overwrite a newer result. The generation check and
//! the store happen under the watch channel's write lock.
//!
//! Subscribers get a `tokio::sync::watch::Receiver`, which works without a
//! runtime: `borrow()` reads the latest value, `has_changed()` polls. The
//! dashboard's inputs travel over the same kind of channel in the other
//! direction.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::Result;
use crate::gateway::Gateway;
use crate::session::{CredentialStore, Session};
use crate::transport::Transport;
use crate::types::{CardId, Criteria, Filters, NextTwoDue, Sort};

/// Proof that a refresh was started; carries its generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

impl Ticket {
    pub fn generation(self) -> u64 {
        self.0
    }
}

pub struct Derived<T> {
    name: &'static str,
    issued: AtomicU64,
    value: watch::Sender<T>,
}

impl<T: Clone> Derived<T> {
    pub fn new(name: &'static str, initial: T) -> Self {
        let (value, _) = watch::channel(initial);
        Self {
            name,
            issued: AtomicU64::new(0),
            value,
        }
    }

    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.value.subscribe()
    }

    /// Start a refresh. Any ticket issued earlier becomes stale.
    pub fn begin(&self) -> Ticket {
        Ticket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Store `value` if `ticket` is still the newest. Returns whether it was
    /// stored.
    pub fn resolve(&self, ticket: Ticket, value: T) -> bool {
        let mut pending = Some(value);
        let applied = self.value.send_if_modified(|current| {
            if self.issued.load(Ordering::SeqCst) != ticket.0 {
                return false;
            }
            match pending.take() {
                Some(v) => {
                    *current = v;
                    true
                }
                None => false,
            }
        });
        if !applied {
            debug!(value = self.name, generation = ticket.0, "dropped stale result");
        }
        applied
    }

    /// Run `fetch` under a fresh ticket. On success the result is stored if
    /// still current; on failure the previous value stays in place.
    pub fn refresh(&self, fetch: impl FnOnce() -> Result<T>) -> Result<bool> {
        let ticket = self.begin();
        match fetch() {
            Ok(value) => Ok(self.resolve(ticket, value)),
            Err(e) => {
                warn!(value = self.name, error = %e, "refresh failed, keeping previous value");
                Err(e)
            }
        }
    }
}

/// Count shown before the first response arrives is `None`.
pub type Count = Option<u64>;

/// Set of dashboard inputs, used both for what a value reads and for what
/// changed since the last sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inputs {
    pub filters: bool,
    pub sort: bool,
    pub card_under_review: bool,
}

impl Inputs {
    pub const NONE: Inputs = Inputs {
        filters: false,
        sort: false,
        card_under_review: false,
    };
    pub const ALL: Inputs = Inputs {
        filters: true,
        sort: true,
        card_under_review: true,
    };
    pub const FILTERS: Inputs = Inputs {
        filters: true,
        ..Inputs::NONE
    };

    pub fn overlaps(self, other: Inputs) -> bool {
        (self.filters && other.filters)
            || (self.sort && other.sort)
            || (self.card_under_review && other.card_under_review)
    }
}

const DUE_COUNT_READS: Inputs = Inputs::FILTERS;
const CREATED_COUNT_READS: Inputs = Inputs::FILTERS;
const NEXT_TWO_DUE_READS: Inputs = Inputs::ALL;

/// Writable side of the dashboard inputs, owned by whoever edits them.
pub struct DashboardInputs {
    filters: watch::Sender<Filters>,
    sort: watch::Sender<Sort>,
    card_under_review: watch::Sender<Option<CardId>>,
}

impl Default for DashboardInputs {
    fn default() -> Self {
        Self::new(Criteria::default())
    }
}

impl DashboardInputs {
    pub fn new(criteria: Criteria) -> Self {
        let (filters, _) = watch::channel(criteria.filters);
        let (sort, _) = watch::channel(criteria.sort);
        let (card_under_review, _) = watch::channel(None);
        Self {
            filters,
            sort,
            card_under_review,
        }
    }

    pub fn set_filters(&self, filters: Filters) {
        self.filters.send_replace(filters);
    }

    pub fn set_sort(&self, sort: Sort) {
        self.sort.send_replace(sort);
    }

    pub fn set_card_under_review(&self, card: Option<CardId>) {
        self.card_under_review.send_replace(card);
    }
}

/// The study screen's live values. Each one reads a fixed set of inputs:
///
/// | value | filters | sort | card under review |
/// |---|---|---|---|
/// | `due_count` | yes | | |
/// | `created_count` | yes | | |
/// | `next_two_due` | yes | yes | yes |
///
/// The dashboard watches the inputs; `sync` refreshes exactly the values
/// whose inputs changed since the previous `load` or `sync`.
pub struct Dashboard {
    pub due_count: Derived<Count>,
    pub created_count: Derived<Count>,
    pub next_two_due: Derived<NextTwoDue>,
    filters: watch::Receiver<Filters>,
    sort: watch::Receiver<Sort>,
    card_under_review: watch::Receiver<Option<CardId>>,
}

impl Dashboard {
    pub fn new(inputs: &DashboardInputs) -> Self {
        Self {
            due_count: Derived::new("due_count", None),
            created_count: Derived::new("created_count", None),
            next_two_due: Derived::new("next_two_due", NextTwoDue::default()),
            filters: inputs.filters.subscribe(),
            sort: inputs.sort.subscribe(),
            card_under_review: inputs.card_under_review.subscribe(),
        }
    }

    /// Current filters and sort as request criteria.
    pub fn criteria(&self) -> Criteria {
        Criteria {
            sort: self.sort.borrow().clone(),
            filters: self.filters.borrow().clone(),
        }
    }

    /// Fetch every value regardless of what changed.
    pub fn load<T: Transport, S: CredentialStore>(
        &mut self,
        gateway: &Gateway<T, S>,
        session: &Session,
    ) -> Result<()> {
        self.take_changes();
        self.refresh(gateway, session, Inputs::ALL)
    }

    /// Refresh the values that read a changed input. Returns which inputs
    /// had changed; `Inputs::NONE` means nothing was fetched.
    pub fn sync<T: Transport, S: CredentialStore>(
        &mut self,
        gateway: &Gateway<T, S>,
        session: &Session,
    ) -> Result<Inputs> {
        let changed = self.take_changes();
        if changed != Inputs::NONE {
            debug!(?changed, "dashboard inputs changed");
            self.refresh(gateway, session, changed)?;
        }
        Ok(changed)
    }

    fn take_changes(&mut self) -> Inputs {
        Inputs {
            filters: mark_seen(&mut self.filters),
            sort: mark_seen(&mut self.sort),
            card_under_review: mark_seen(&mut self.card_under_review),
        }
    }

    /// Every affected value is attempted; the first error is returned.
    fn refresh<T: Transport, S: CredentialStore>(
        &self,
        gateway: &Gateway<T, S>,
        session: &Session,
        changed: Inputs,
    ) -> Result<()> {
        let criteria = self.criteria();
        let due = refresh_if(DUE_COUNT_READS, changed, || {
            self.due_count
                .refresh(|| gateway.due_count(session, &criteria.filters).map(Some))
        });
        let created = refresh_if(CREATED_COUNT_READS, changed, || {
            self.created_count
                .refresh(|| gateway.created_count(session, &criteria.filters).map(Some))
        });
        let next = refresh_if(NEXT_TWO_DUE_READS, changed, || {
            self.next_two_due.refresh(|| gateway.next_two_due(session, &criteria))
        });
        due.and(created).and(next)
    }
}

fn refresh_if(reads: Inputs, changed: Inputs, refresh: impl FnOnce() -> Result<bool>) -> Result<()> {
    if reads.overlaps(changed) {
        refresh().map(|_| ())
    } else {
        Ok(())
    }
}

/// A closed sender counts as unchanged.
fn mark_seen<T>(rx: &mut watch::Receiver<T>) -> bool {
    let changed = rx.has_changed().unwrap_or(false);
    if changed {
        rx.borrow_and_update();
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use serde_json::json;
    use std::sync::{Arc, Barrier};

    #[test]
    fn holds_default_until_resolved() {
        let d = Derived::new("count", None::<u64>);
        assert_eq!(d.get(), None);
        let t = d.begin();
        assert!(d.resolve(t, Some(4)));
        assert_eq!(d.get(), Some(4));
    }

    #[test]
    fn stale_ticket_cannot_overwrite_newer_result() {
        let d = Derived::new("count", 0u64);
        let old = d.begin();
        let new = d.begin();
        assert!(d.resolve(new, 2));
        assert!(!d.resolve(old, 1));
        assert_eq!(d.get(), 2);
    }

    #[test]
    fn stale_ticket_dropped_even_if_it_finishes_first() {
        let d = Derived::new("count", 0u64);
        let old = d.begin();
        let new = d.begin();
        assert!(!d.resolve(old, 1));
        assert_eq!(d.get(), 0);
        assert!(d.resolve(new, 2));
        assert_eq!(d.get(), 2);
    }

    #[test]
    fn failed_refresh_keeps_previous_value() {
        let d = Derived::new("count", Some(3u64));
        let err = d
            .refresh(|| Err(ApiError::Transport("offline".to_string())))
            .unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert_eq!(d.get(), Some(3));
    }

    #[test]
    fn subscribers_see_applied_values_only() {
        let d = Derived::new("count", 0u64);
        let mut rx = d.subscribe();
        let old = d.begin();
        let new = d.begin();
        d.resolve(old, 1);
        assert!(!rx.has_changed().unwrap());
        d.resolve(new, 2);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 2);
    }

    #[test]
    fn racing_threads_leave_newest_generation() {
        let d = Arc::new(Derived::new("count", 0u64));
        let barrier = Arc::new(Barrier::new(2));
        let old = d.begin();
        let new = d.begin();

        let handles: Vec<_> = [(old, 1u64), (new, 2u64)]
            .into_iter()
            .map(|(ticket, value)| {
                let d = Arc::clone(&d);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    d.resolve(ticket, value)
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(d.get(), 2);
    }

    #[test]
    fn declared_reads_follow_the_dependency_table() {
        let sort = Inputs {
            sort: true,
            ..Inputs::NONE
        };
        let card = Inputs {
            card_under_review: true,
            ..Inputs::NONE
        };
        assert!(!DUE_COUNT_READS.overlaps(sort));
        assert!(!CREATED_COUNT_READS.overlaps(card));
        assert!(NEXT_TWO_DUE_READS.overlaps(sort));
        assert!(NEXT_TWO_DUE_READS.overlaps(card));
        assert!(DUE_COUNT_READS.overlaps(Inputs::FILTERS));
        assert!(!Inputs::ALL.overlaps(Inputs::NONE));
    }

    #[test]
    fn dashboard_sees_each_input_change_once() {
        let inputs = DashboardInputs::default();
        let mut dashboard = Dashboard::new(&inputs);
        assert_eq!(dashboard.take_changes(), Inputs::NONE);

        inputs.set_sort(Sort(json!("-front")));
        inputs.set_card_under_review(Some(CardId::from(3)));
        assert_eq!(
            dashboard.take_changes(),
            Inputs {
                sort: true,
                card_under_review: true,
                ..Inputs::NONE
            }
        );
        assert_eq!(dashboard.take_changes(), Inputs::NONE);
        assert_eq!(dashboard.criteria().sort, Sort(json!("-front")));
    }

    #[test]
    fn dropped_inputs_count_as_unchanged() {
        let inputs = DashboardInputs::new(Criteria {
            sort: Sort(json!("front")),
            filters: Filters(json!({"tags": ["french"]})),
        });
        let mut dashboard = Dashboard::new(&inputs);
        drop(inputs);
        assert_eq!(dashboard.take_changes(), Inputs::NONE);
        assert_eq!(dashboard.criteria().filters, Filters(json!({"tags": ["french"]})));
    }
}
