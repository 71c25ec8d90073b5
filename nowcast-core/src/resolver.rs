//! Location-then-weather resolution state machine.
//!
//! One [`LocationWeatherResolver`] owns one [`ResolutionState`] and runs at
//! most one attempt at a time: acquire a position, fetch conditions for it,
//! publish the outcome. Observers follow along through a `watch`
//! subscription; a display layer renders whatever the current state is.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Timeouts;
use crate::error::ErrorKind;
use crate::locate::LocationSource;
use crate::model::{ResolutionState, WeatherSnapshot};
use crate::provider::WeatherProvider;

/// Bookkeeping for the attempt currently holding the in-flight slot.
///
/// The generation id is what makes late completions detectable: `cancel()`
/// empties the slot, and an attempt may only publish state or settle while
/// its own generation still occupies it.
struct Attempt {
    generation: u64,
    token: CancellationToken,
}

struct InflightSlot {
    current: Option<Attempt>,
    next_generation: u64,
}

/// Produces a [`WeatherSnapshot`] for the caller's current location, or a
/// typed failure.
///
/// Instances are independent; each owns its state exclusively. Within one
/// instance `resolve()` is guarded: a second call while one is pending is
/// rejected with [`ErrorKind::Busy`] rather than coalesced, so a caller
/// always knows whether it started an attempt.
pub struct LocationWeatherResolver {
    location: Arc<dyn LocationSource>,
    weather: Arc<dyn WeatherProvider>,
    timeouts: Timeouts,
    state_tx: watch::Sender<ResolutionState>,
    inflight: Mutex<InflightSlot>,
}

impl LocationWeatherResolver {
    pub fn new(
        location: Arc<dyn LocationSource>,
        weather: Arc<dyn WeatherProvider>,
        timeouts: Timeouts,
    ) -> Self {
        let (state_tx, _) = watch::channel(ResolutionState::Idle);

        Self {
            location,
            weather,
            timeouts,
            state_tx,
            inflight: Mutex::new(InflightSlot { current: None, next_generation: 0 }),
        }
    }

    /// Read-only subscription to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ResolutionState> {
        self.state_tx.subscribe()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ResolutionState {
        self.state_tx.borrow().clone()
    }

    /// Run one resolution attempt: acquire a position, fetch conditions.
    ///
    /// Returns [`ErrorKind::Busy`] if an attempt is already pending on this
    /// instance. Never retries on its own; every failure settles the attempt
    /// and leaves the instance ready for the next call.
    pub async fn resolve(&self) -> Result<WeatherSnapshot, ErrorKind> {
        let (generation, token) = {
            let mut slot = self.inflight.lock();
            if slot.current.is_some() {
                return Err(ErrorKind::Busy);
            }

            let generation = slot.next_generation;
            slot.next_generation += 1;

            let token = CancellationToken::new();
            slot.current = Some(Attempt { generation, token: token.clone() });
            (generation, token)
        };

        let result = self.run_attempt(generation, &token).await;

        // Settle under the lock: only the attempt still occupying the slot
        // may publish its outcome. If `cancel()` got there first, the slot is
        // empty and this result is discarded.
        let mut slot = self.inflight.lock();
        let still_current = slot
            .current
            .as_ref()
            .is_some_and(|a| a.generation == generation);

        if !still_current {
            debug!(generation, "attempt was cancelled; discarding its result");
            return Err(ErrorKind::Cancelled);
        }
        slot.current = None;

        match result {
            Ok(snapshot) => {
                self.state_tx
                    .send_replace(ResolutionState::Ready(snapshot.clone()));
                Ok(snapshot)
            }
            Err(ErrorKind::Cancelled) => {
                self.state_tx.send_replace(ResolutionState::Idle);
                Err(ErrorKind::Cancelled)
            }
            Err(kind) => {
                warn!(generation, error = %kind, "resolution attempt failed");
                self.state_tx
                    .send_replace(ResolutionState::Failed(kind.clone()));
                Err(kind)
            }
        }
    }

    /// Abort the in-flight attempt, if any.
    ///
    /// The pending `resolve()` settles with [`ErrorKind::Cancelled`] and the
    /// state returns to `Idle`; a late answer from the position or weather
    /// lookup is discarded. Idempotent when nothing is in flight.
    pub fn cancel(&self) {
        let mut slot = self.inflight.lock();
        if let Some(attempt) = slot.current.take() {
            debug!(generation = attempt.generation, "cancelling in-flight resolution");
            attempt.token.cancel();
            self.state_tx.send_replace(ResolutionState::Idle);
        }
    }

    async fn run_attempt(
        &self,
        generation: u64,
        token: &CancellationToken,
    ) -> Result<WeatherSnapshot, ErrorKind> {
        self.publish_if_current(generation, ResolutionState::Locating);
        debug!(generation, "acquiring current position");

        let position = tokio::select! {
            _ = token.cancelled() => return Err(ErrorKind::Cancelled),
            located = tokio::time::timeout(self.timeouts.locate(), self.location.locate()) => {
                match located {
                    Ok(Ok(position)) => position,
                    // Source failures all count as "no position", per the
                    // LocationSource contract.
                    Ok(Err(ErrorKind::LocationUnavailable(reason))) => {
                        return Err(ErrorKind::LocationUnavailable(reason));
                    }
                    Ok(Err(other)) => {
                        return Err(ErrorKind::LocationUnavailable(other.to_string()));
                    }
                    Err(_) => {
                        return Err(ErrorKind::LocationUnavailable(format!(
                            "no position within {}s",
                            self.timeouts.locate_secs
                        )));
                    }
                }
            }
        };

        debug!(generation, position = %position.coordinate, "position acquired");
        self.publish_if_current(generation, ResolutionState::Fetching);

        let snapshot = tokio::select! {
            _ = token.cancelled() => return Err(ErrorKind::Cancelled),
            fetched = tokio::time::timeout(self.timeouts.fetch(), self.weather.current(&position)) => {
                match fetched {
                    Ok(Ok(snapshot)) => snapshot,
                    Ok(Err(kind)) => return Err(kind),
                    Err(_) => {
                        return Err(ErrorKind::Network(format!(
                            "weather request timed out after {}s",
                            self.timeouts.fetch_secs
                        )));
                    }
                }
            }
        };

        debug!(generation, provider = %snapshot.provider, "conditions fetched");
        Ok(snapshot)
    }

    /// Publish an intermediate state, but only while this attempt still owns
    /// the slot. Holding the lock across the send keeps a cancelled attempt
    /// from racing its own stale transition past `cancel()`'s reset.
    fn publish_if_current(&self, generation: u64, state: ResolutionState) {
        let slot = self.inflight.lock();
        let current = slot
            .current
            .as_ref()
            .is_some_and(|a| a.generation == generation);

        if current {
            self.state_tx.send_replace(state);
        }
    }
}
