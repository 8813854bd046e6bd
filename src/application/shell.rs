//! Session-scoped dashboard state.
//!
//! Each browser session owns one filter set. Every indicator page reads it and
//! none of them resets it. Changing the filters bumps a generation counter so
//! renders started under the previous filters can tell they are stale.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use time::Date;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{Clock, SystemClock};
use crate::domain::filters::{FilterError, FilterSet};

pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

type TodayFn = dyn Fn() -> Date + Send + Sync;

#[derive(Debug, Clone)]
struct SessionState {
    filters: FilterSet,
    generation: u64,
    last_seen: Instant,
    notice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub filters: FilterSet,
    pub generation: u64,
    /// One-shot message left by the previous interaction.
    pub notice: Option<String>,
}

pub struct DashboardShell {
    sessions: DashMap<Uuid, SessionState>,
    today: Arc<TodayFn>,
    clock: Arc<dyn Clock>,
    idle_timeout: Duration,
}

impl DashboardShell {
    pub fn new(today: impl Fn() -> Date + Send + Sync + 'static) -> Self {
        Self::with_clock(today, Arc::new(SystemClock))
    }

    pub fn with_clock(
        today: impl Fn() -> Date + Send + Sync + 'static,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            today: Arc::new(today),
            clock,
            idle_timeout: SESSION_IDLE_TIMEOUT,
        }
    }

    /// Filters a new session starts with: month to date.
    pub fn default_filters(&self) -> FilterSet {
        FilterSet::month_to_date((self.today)())
    }

    /// Return the id of a live session, starting a new one when `id` is unknown.
    pub fn session(&self, id: Option<Uuid>) -> Uuid {
        if let Some(id) = id {
            if let Some(mut state) = self.sessions.get_mut(&id) {
                state.last_seen = self.clock.now();
                return id;
            }
        }

        let id = Uuid::new_v4();
        self.sessions.insert(id, self.fresh_state());
        debug!(session = %id, "Started dashboard session");
        id
    }

    /// Read the session state for a render, consuming any pending notice.
    pub fn open(&self, id: Uuid) -> SessionSnapshot {
        let now = self.clock.now();
        let mut state = self
            .sessions
            .entry(id)
            .or_insert_with(|| self.fresh_state());
        state.last_seen = now;

        SessionSnapshot {
            id,
            filters: state.filters,
            generation: state.generation,
            notice: state.notice.take(),
        }
    }

    pub fn filters(&self, id: Uuid) -> FilterSet {
        self.sessions
            .get(&id)
            .map(|state| state.filters)
            .unwrap_or_else(|| self.default_filters())
    }

    pub fn generation(&self, id: Uuid) -> Option<u64> {
        self.sessions.get(&id).map(|state| state.generation)
    }

    /// Replace the session filters. Returns the resulting generation.
    pub fn update_filters(&self, id: Uuid, filters: FilterSet) -> u64 {
        let now = self.clock.now();
        let mut state = self
            .sessions
            .entry(id)
            .or_insert_with(|| self.fresh_state());
        state.last_seen = now;
        state.notice = None;
        if state.filters != filters {
            state.filters = filters;
            state.generation += 1;
            debug!(session = %id, generation = state.generation, "Session filters changed");
        }
        state.generation
    }

    /// Apply raw form input. Invalid input leaves the filters untouched and
    /// stores a notice for the next render.
    pub fn apply_form(
        &self,
        id: Uuid,
        start: &str,
        end: &str,
        buyer: &str,
        supplier: &str,
    ) -> Result<FilterSet, FilterError> {
        match FilterSet::parse(start, end, buyer, supplier) {
            Ok(filters) => {
                self.update_filters(id, filters);
                Ok(filters)
            }
            Err(err) => {
                let now = self.clock.now();
                let mut state = self
                    .sessions
                    .entry(id)
                    .or_insert_with(|| self.fresh_state());
                state.last_seen = now;
                state.notice = Some(format!("Filters not applied: {err}"));
                Err(err)
            }
        }
    }

    /// Forget sessions idle for longer than the timeout. Returns how many were dropped.
    pub fn purge_idle(&self) -> usize {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, state| {
            now.saturating_duration_since(state.last_seen) < self.idle_timeout
        });
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!(removed, "Expired idle dashboard sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn fresh_state(&self) -> SessionState {
        SessionState {
            filters: self.default_filters(),
            generation: 0,
            last_seen: self.clock.now(),
            notice: None,
        }
    }
}
