//! Onboarding of waiting participants: login event, instance choice, spawn
//! cell wait, placement.

use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use worldtick_common::{EntityId, InstanceId, SessionId};
use worldtick_kernel::{EntityHandle, Event, EventBus, InstanceHandle, LoginEvent, SpawnEvent, WorldRegistry};
use worldtick_stream::CellHandle;

use crate::pool::panic_message;
use crate::queue::Admission;
use crate::stats::SchedulerStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// A login listener returned an error or panicked.
    ListenerFailed,
    /// The spawn cell did not become resident before the deadline.
    CellLoadTimedOut,
    /// The entity was already owned by an instance.
    AlreadyOwned,
}

/// Progress of one participant through onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingState {
    Waiting,
    LoginResolving,
    InstanceResolving,
    ChunkLoading,
    Placed,
    Failed(FailureReason),
}

impl OnboardingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Placed | Self::Failed(_))
    }
}

struct TicketState {
    state: OnboardingState,
    instance: Option<InstanceId>,
    deadline: Option<Instant>,
}

struct TicketInner {
    session: SessionId,
    entity: EntityId,
    enqueued_at: Instant,
    state: Mutex<TicketState>,
    changed: Condvar,
}

/// Shared view of a participant's onboarding, handed back on enqueue.
#[derive(Clone)]
pub struct OnboardingTicket {
    inner: Arc<TicketInner>,
}

impl OnboardingTicket {
    pub(crate) fn new(session: SessionId, entity: EntityId) -> Self {
        Self {
            inner: Arc::new(TicketInner {
                session,
                entity,
                enqueued_at: Instant::now(),
                state: Mutex::new(TicketState {
                    state: OnboardingState::Waiting,
                    instance: None,
                    deadline: None,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn session(&self) -> SessionId {
        self.inner.session
    }

    pub fn entity(&self) -> EntityId {
        self.inner.entity
    }

    pub fn enqueued_at(&self) -> Instant {
        self.inner.enqueued_at
    }

    pub fn state(&self) -> OnboardingState {
        self.inner.state.lock().state
    }

    /// Instance chosen for the participant, once resolved.
    pub fn instance(&self) -> Option<InstanceId> {
        self.inner.state.lock().instance
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Block until placed or failed, or until `timeout` passes.
    pub fn wait(&self, timeout: Duration) -> OnboardingState {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.state.lock();
        while !guard.state.is_terminal() {
            if self.inner.changed.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        guard.state
    }

    fn set(&self, guard: &mut TicketState, to: OnboardingState) {
        guard.state = to;
        self.inner.changed.notify_all();
    }

    /// Move `from -> to`. False if the ticket was elsewhere.
    pub(crate) fn advance(&self, from: OnboardingState, to: OnboardingState) -> bool {
        let mut guard = self.inner.state.lock();
        if guard.state != from {
            return false;
        }
        self.set(&mut guard, to);
        true
    }

    pub(crate) fn fail(&self, reason: FailureReason) {
        let mut guard = self.inner.state.lock();
        if !guard.state.is_terminal() {
            self.set(&mut guard, OnboardingState::Failed(reason));
        }
    }

    pub(crate) fn begin_cell_wait(&self, instance: InstanceId, deadline: Option<Instant>) -> bool {
        let mut guard = self.inner.state.lock();
        if guard.state != OnboardingState::InstanceResolving {
            return false;
        }
        guard.instance = Some(instance);
        guard.deadline = deadline;
        self.set(&mut guard, OnboardingState::ChunkLoading);
        true
    }

    /// Fail the ticket if it is still waiting on its cell past the deadline.
    pub(crate) fn expire_if_overdue(&self, now: Instant) -> bool {
        let mut guard = self.inner.state.lock();
        let overdue = guard.state == OnboardingState::ChunkLoading
            && guard.deadline.is_some_and(|deadline| now >= deadline);
        if overdue {
            self.set(&mut guard, OnboardingState::Failed(FailureReason::CellLoadTimedOut));
        }
        overdue
    }

    /// Run `place` while holding the ticket, if it is still waiting on its
    /// cell. The returned state becomes final. `None` if the ticket had
    /// already expired.
    pub(crate) fn settle(&self, place: impl FnOnce() -> OnboardingState) -> Option<OnboardingState> {
        let mut guard = self.inner.state.lock();
        if guard.state != OnboardingState::ChunkLoading {
            return None;
        }
        let outcome = place();
        self.set(&mut guard, outcome);
        Some(outcome)
    }
}

impl std::fmt::Debug for OnboardingTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnboardingTicket")
            .field("session", &self.inner.session)
            .field("entity", &self.inner.entity)
            .field("state", &self.state())
            .finish()
    }
}

/// Dispatch `event`, turning listener errors and panics into a message.
fn fire_contained<E: Event>(events: &EventBus, event: &mut E) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(|| events.fire(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(format!(
            "listener for {} panicked: {}",
            E::NAME,
            panic_message(payload.as_ref())
        )),
    }
}

/// Everything an onboarding task needs, shared by all of them.
pub(crate) struct Onboarding {
    pub registry: Arc<dyn WorldRegistry>,
    pub events: Arc<EventBus>,
    pub stats: Arc<SchedulerStats>,
    pub cell_timeout: Option<Duration>,
}

impl Onboarding {
    /// Drive one participant up to the cell request. Placement finishes in
    /// the cell callback, on whichever thread completes the load.
    pub(crate) fn run(self: &Arc<Self>, admission: Admission) {
        let Admission {
            participant,
            ticket,
        } = admission;
        let _span = tracing::debug_span!(
            "onboarding",
            session = %participant.session,
            entity = %participant.entity.id()
        )
        .entered();

        if !ticket.advance(OnboardingState::Waiting, OnboardingState::LoginResolving) {
            return;
        }
        let mut login = LoginEvent::new(participant.session, participant.entity.id(), participant.position);
        if let Err(message) = fire_contained(&self.events, &mut login) {
            ticket.fail(FailureReason::ListenerFailed);
            self.stats.onboarding_failed();
            tracing::warn!(%message, "login rejected; participant dropped");
            return;
        }

        ticket.advance(OnboardingState::LoginResolving, OnboardingState::InstanceResolving);
        let instance = match login.take_spawning_instance() {
            Some(instance) => instance,
            None => {
                let instance = self.registry.create_default_instance();
                tracing::debug!(instance = %instance.id(), "no spawning instance chosen; created one");
                instance
            }
        };

        let deadline = self.cell_timeout.map(|timeout| Instant::now() + timeout);
        if !ticket.begin_cell_wait(instance.id(), deadline) {
            return;
        }
        tracing::trace!(instance = %instance.id(), "waiting for spawn cell");

        let this = Arc::clone(self);
        let target = Arc::clone(&instance);
        let position = participant.position;
        instance.request_cell(position, move |cell| {
            this.place(participant.session, participant.entity, ticket, target, cell)
        });
    }

    fn place(
        &self,
        session: SessionId,
        entity: EntityHandle,
        ticket: OnboardingTicket,
        instance: InstanceHandle,
        cell: CellHandle,
    ) {
        let outcome = ticket.settle(|| match instance.spawn(Arc::clone(&entity)) {
            Ok(()) => OnboardingState::Placed,
            Err(err) => {
                tracing::warn!(%session, %err, "participant not placed");
                OnboardingState::Failed(FailureReason::AlreadyOwned)
            }
        });

        match outcome {
            None => {
                tracing::debug!(%session, cell = %cell.coord, "spawn cell arrived after onboarding expired");
            }
            Some(OnboardingState::Placed) => {
                self.stats.participant_placed();
                tracing::info!(
                    %session,
                    entity = %entity.id(),
                    instance = %instance.id(),
                    cell = %cell.coord,
                    "participant placed"
                );
                let mut spawned = SpawnEvent {
                    session,
                    entity: entity.id(),
                    instance: instance.id(),
                    position: entity.position(),
                };
                // Placement already happened; a failing listener only gets logged.
                if let Err(message) = fire_contained(&self.events, &mut spawned) {
                    tracing::warn!(%session, %message, "spawn listener failed");
                }
            }
            Some(_) => self.stats.onboarding_failed(),
        }
    }
}
