//! Per-endpoint circuit breaker state machine.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: endpoint assumed down, requests fail fast
//! - Half-Open: exactly one trial request is in flight
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first admission attempt after open_timeout
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails (timeout restarts)
//! ```
//!
//! Every transition bumps the generation; outcomes reported against an older
//! generation are ignored.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::endpoint::EndpointKey;

/// Breaker state. Serialized as `closed`, `open`, `half-open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(State::Closed),
            "open" => Ok(State::Open),
            "half-open" => Ok(State::HalfOpen),
            other => Err(format!("unknown breaker state '{}'", other)),
        }
    }
}

/// Request counters for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

/// Breaker tuning shared by every endpoint.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Trip when consecutive failures reach this value.
    pub failure_threshold: u32,
    /// Time spent Open before a trial is admitted. Also the status TTL.
    pub open_timeout: Duration,
    /// Closed-state window after which counts are cleared. `None` keeps them.
    pub interval: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
            interval: None,
        }
    }
}

impl Settings {
    /// Trip policy: `consecutive_failures >= failure_threshold`.
    pub fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.consecutive_failures >= self.failure_threshold
    }
}

/// A state change, reported to transition observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub endpoint: EndpointKey,
    pub from: State,
    pub to: State,
    pub generation: u64,
}

/// Proof of admission for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
    trial: bool,
}

/// The breaker refused to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected;

/// Point-in-time view of a breaker for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub endpoint: EndpointKey,
    pub state: State,
    pub generation: u64,
    pub counts: Counts,
}

#[derive(Debug)]
struct Inner {
    state: State,
    counts: Counts,
    generation: u64,
    expiry: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker for one endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: EndpointKey,
    settings: Settings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: EndpointKey, settings: Settings) -> Self {
        let expiry = settings.interval.map(|i| Instant::now() + i);
        Self {
            endpoint,
            settings,
            inner: Mutex::new(Inner {
                state: State::Closed,
                counts: Counts::default(),
                generation: 0,
                expiry,
                trial_in_flight: false,
            }),
        }
    }

    pub fn endpoint(&self) -> &EndpointKey {
        &self.endpoint
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current state, applying any time-based transition first.
    pub fn state(&self, now: Instant, transitions: &mut Vec<Transition>) -> State {
        let mut inner = self.lock();
        self.current_state(&mut inner, now, transitions)
    }

    /// Stored state without advancing the clock.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            endpoint: self.endpoint.clone(),
            state: inner.state,
            generation: inner.generation,
            counts: inner.counts,
        }
    }

    /// Admit a call, or reject it while Open or while a trial is in flight.
    pub fn try_acquire(
        &self,
        now: Instant,
        transitions: &mut Vec<Transition>,
    ) -> Result<Ticket, Rejected> {
        let mut inner = self.lock();
        let state = self.current_state(&mut inner, now, transitions);

        let trial = match state {
            State::Open => return Err(Rejected),
            State::HalfOpen if inner.trial_in_flight => return Err(Rejected),
            State::HalfOpen => {
                inner.trial_in_flight = true;
                true
            }
            State::Closed => false,
        };

        inner.counts.on_request();
        Ok(Ticket {
            generation: inner.generation,
            trial,
        })
    }

    /// Report the outcome of an admitted call.
    pub fn record(
        &self,
        ticket: Ticket,
        success: bool,
        now: Instant,
        transitions: &mut Vec<Transition>,
    ) {
        let mut inner = self.lock();
        let state = self.current_state(&mut inner, now, transitions);
        if ticket.generation != inner.generation {
            return;
        }

        if success {
            inner.counts.on_success();
            if state == State::HalfOpen {
                self.set_state(&mut inner, State::Closed, now, transitions);
            }
        } else {
            inner.counts.on_failure();
            match state {
                State::Closed if self.settings.ready_to_trip(&inner.counts) => {
                    self.set_state(&mut inner, State::Open, now, transitions);
                }
                State::HalfOpen => {
                    self.set_state(&mut inner, State::Open, now, transitions);
                }
                _ => {}
            }
        }
    }

    /// Release an admitted call whose outcome will never be reported.
    ///
    /// Frees the half-open trial slot without counting a success or failure.
    pub fn abandon(&self, ticket: Ticket) {
        let mut inner = self.lock();
        if ticket.trial && ticket.generation == inner.generation {
            inner.trial_in_flight = false;
        }
    }

    fn current_state(
        &self,
        inner: &mut Inner,
        now: Instant,
        transitions: &mut Vec<Transition>,
    ) -> State {
        match inner.state {
            State::Closed => {
                if matches!(inner.expiry, Some(expiry) if expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            State::Open => {
                if matches!(inner.expiry, Some(expiry) if expiry <= now) {
                    self.set_state(inner, State::HalfOpen, now, transitions);
                }
            }
            State::HalfOpen => {}
        }
        inner.state
    }

    fn set_state(
        &self,
        inner: &mut Inner,
        to: State,
        now: Instant,
        transitions: &mut Vec<Transition>,
    ) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        self.new_generation(inner, now);

        transitions.push(Transition {
            endpoint: self.endpoint.clone(),
            from,
            to,
            generation: inner.generation,
        });
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.trial_in_flight = false;
        inner.expiry = match inner.state {
            State::Closed => self.settings.interval.map(|i| now + i),
            State::Open => Some(now + self.settings.open_timeout),
            State::HalfOpen => None,
        };
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, open_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            EndpointKey::new("GET", "http://a/x").unwrap(),
            Settings {
                failure_threshold: threshold,
                open_timeout: Duration::from_secs(open_secs),
                interval: None,
            },
        )
    }

    fn fail(cb: &CircuitBreaker, now: Instant, out: &mut Vec<Transition>) {
        let ticket = cb.try_acquire(now, out).unwrap();
        cb.record(ticket, false, now, out);
    }

    #[test]
    fn test_trips_at_threshold() {
        let cb = breaker(5, 60);
        let now = Instant::now();
        let mut out = Vec::new();

        for _ in 0..4 {
            fail(&cb, now, &mut out);
        }
        assert_eq!(cb.state(now, &mut out), State::Closed);
        assert!(out.is_empty());

        fail(&cb, now, &mut out);
        assert_eq!(cb.state(now, &mut out), State::Open);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].from, State::Closed);
        assert_eq!(out[0].to, State::Open);
        assert_eq!(cb.try_acquire(now, &mut out), Err(Rejected));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, 60);
        let now = Instant::now();
        let mut out = Vec::new();

        fail(&cb, now, &mut out);
        fail(&cb, now, &mut out);
        let ticket = cb.try_acquire(now, &mut out).unwrap();
        cb.record(ticket, true, now, &mut out);
        fail(&cb, now, &mut out);
        fail(&cb, now, &mut out);

        assert_eq!(cb.state(now, &mut out), State::Closed);
        assert_eq!(cb.snapshot().counts.consecutive_failures, 2);
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let cb = breaker(1, 10);
        let start = Instant::now();
        let mut out = Vec::new();
        fail(&cb, start, &mut out);

        let early = start + Duration::from_secs(9);
        assert_eq!(cb.try_acquire(early, &mut out), Err(Rejected));

        let later = start + Duration::from_secs(10);
        let trial = cb.try_acquire(later, &mut out).unwrap();
        assert_eq!(cb.state(later, &mut out), State::HalfOpen);
        assert_eq!(cb.try_acquire(later, &mut out), Err(Rejected));

        cb.record(trial, true, later, &mut out);
        assert_eq!(cb.state(later, &mut out), State::Closed);
        let states: Vec<_> = out.iter().map(|t| t.to).collect();
        assert_eq!(states, vec![State::Open, State::HalfOpen, State::Closed]);
    }

    #[test]
    fn test_failed_trial_reopens_and_restarts_timeout() {
        let cb = breaker(1, 10);
        let start = Instant::now();
        let mut out = Vec::new();
        fail(&cb, start, &mut out);

        let t1 = start + Duration::from_secs(10);
        fail(&cb, t1, &mut out);
        assert_eq!(cb.state(t1, &mut out), State::Open);

        assert_eq!(
            cb.try_acquire(t1 + Duration::from_secs(9), &mut out),
            Err(Rejected)
        );
        assert!(cb.try_acquire(t1 + Duration::from_secs(10), &mut out).is_ok());
    }

    #[test]
    fn test_stale_generation_outcome_ignored() {
        let cb = breaker(1, 10);
        let now = Instant::now();
        let mut out = Vec::new();

        let stale = cb.try_acquire(now, &mut out).unwrap();
        fail(&cb, now, &mut out);
        assert_eq!(cb.state(now, &mut out), State::Open);

        cb.record(stale, true, now, &mut out);
        assert_eq!(cb.state(now, &mut out), State::Open);
    }

    #[test]
    fn test_abandoned_trial_frees_slot() {
        let cb = breaker(1, 1);
        let start = Instant::now();
        let mut out = Vec::new();
        fail(&cb, start, &mut out);

        let later = start + Duration::from_secs(1);
        let trial = cb.try_acquire(later, &mut out).unwrap();
        cb.abandon(trial);
        assert!(cb.try_acquire(later, &mut out).is_ok());
    }

    #[test]
    fn test_interval_clears_closed_counts() {
        let cb = CircuitBreaker::new(
            EndpointKey::new("GET", "http://a/x").unwrap(),
            Settings {
                failure_threshold: 3,
                open_timeout: Duration::from_secs(60),
                interval: Some(Duration::from_secs(5)),
            },
        );
        let start = Instant::now();
        let mut out = Vec::new();
        fail(&cb, start, &mut out);
        fail(&cb, start, &mut out);

        let later = start + Duration::from_secs(6);
        fail(&cb, later, &mut out);
        assert_eq!(cb.state(later, &mut out), State::Closed);
        assert_eq!(cb.snapshot().counts.consecutive_failures, 1);
    }

    #[test]
    fn test_state_string_form() {
        assert_eq!("half-open".parse::<State>(), Ok(State::HalfOpen));
        assert_eq!(State::Open.to_string(), "open");
        assert!("OPEN".parse::<State>().is_err());
    }
}
