use crossbeam_channel::{Receiver, Sender};
use glam::Vec3;
use worldtick_common::{EntityId, SessionId};
use worldtick_kernel::{Entity, EntityHandle, EntityKind, Tickable};

use crate::onboarding::OnboardingTicket;

/// A participant that has connected but is not yet in any instance.
pub struct WaitingParticipant {
    pub session: SessionId,
    pub entity: EntityHandle,
    /// Requested spawn point. Decides which cell must be resident first.
    pub position: Vec3,
}

impl WaitingParticipant {
    pub fn new(session: SessionId, body: impl Tickable + 'static) -> Self {
        Self::with_id(session, EntityId::new(), body)
    }

    pub fn with_id(session: SessionId, id: EntityId, body: impl Tickable + 'static) -> Self {
        let entity = Entity::with_id(id, EntityKind::Participant, body);
        let position = entity.position();
        Self {
            session,
            entity,
            position,
        }
    }
}

impl std::fmt::Debug for WaitingParticipant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitingParticipant")
            .field("session", &self.session)
            .field("entity", &self.entity.id())
            .field("position", &self.position)
            .finish()
    }
}

pub(crate) struct Admission {
    pub participant: WaitingParticipant,
    pub ticket: OnboardingTicket,
}

fn admit(tx: &Sender<Admission>, participant: WaitingParticipant) -> OnboardingTicket {
    let ticket = OnboardingTicket::new(participant.session, participant.entity.id());
    let session = participant.session;
    let admission = Admission {
        participant,
        ticket: ticket.clone(),
    };
    if tx.send(admission).is_err() {
        tracing::warn!(%session, "onboarding queue closed; participant dropped");
    }
    ticket
}

/// Cloneable enqueue handle for connection threads.
#[derive(Clone)]
pub struct OnboardingSender {
    tx: Sender<Admission>,
}

impl OnboardingSender {
    pub fn enqueue(&self, participant: WaitingParticipant) -> OnboardingTicket {
        admit(&self.tx, participant)
    }
}

/// Unbounded multi-producer queue of waiting participants.
///
/// Producers never block. Only the scheduler drains it.
pub struct OnboardingQueue {
    tx: Sender<Admission>,
    rx: Receiver<Admission>,
}

impl Default for OnboardingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OnboardingQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> OnboardingSender {
        OnboardingSender {
            tx: self.tx.clone(),
        }
    }

    pub fn push(&self, participant: WaitingParticipant) -> OnboardingTicket {
        admit(&self.tx, participant)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Take the entries queued at the moment of the call.
    ///
    /// Entries pushed while draining stay for the next drain.
    pub(crate) fn drain(&self) -> Vec<Admission> {
        let count = self.rx.len();
        let mut drained = Vec::with_capacity(count);
        for _ in 0..count {
            match self.rx.try_recv() {
                Ok(admission) => drained.push(admission),
                Err(_) => break,
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::OnboardingState;
    use worldtick_kernel::bodies::Resting;

    fn participant() -> WaitingParticipant {
        WaitingParticipant::new(SessionId::new(), Resting::at(Vec3::new(1.0, 64.0, 1.0)))
    }

    #[test]
    fn waiting_participant_uses_body_position() {
        let p = participant();
        assert_eq!(p.position, Vec3::new(1.0, 64.0, 1.0));
        assert_eq!(p.entity.kind(), EntityKind::Participant);
        assert!(!p.entity.is_spawned());
    }

    #[test]
    fn enqueue_returns_waiting_ticket() {
        let queue = OnboardingQueue::new();
        let p = participant();
        let session = p.session;
        let ticket = queue.push(p);
        assert_eq!(ticket.session(), session);
        assert_eq!(ticket.state(), OnboardingState::Waiting);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_takes_everything_queued() {
        let queue = OnboardingQueue::new();
        for _ in 0..3 {
            queue.push(participant());
        }
        assert_eq!(queue.drain().len(), 3);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn senders_feed_the_same_queue() {
        let queue = OnboardingQueue::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sender = queue.sender();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        sender.enqueue(participant());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 100);
        assert_eq!(queue.drain().len(), 100);
    }
}
