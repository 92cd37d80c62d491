//! Per-conversation dispatch lanes.
//!
//! Every conversation (a roster thread or an unsaved draft session) owns a
//! lane.  A lane has at most one chat request in flight; further turns wait
//! in FIFO order.  Because replies therefore resolve in dispatch order, the
//! reply for the in-flight turn always belongs directly after the
//! `awaiting - 1` newest user messages of that conversation:
//!
//! ```text
//! history:  … U1 U2 U3          (U1 in flight, U2/U3 queued, awaiting = 3)
//! reply 1:  … U1 A1 U2 U3       (inserted at len - (awaiting - 1))
//! ```

use std::collections::{HashMap, VecDeque};

use crate::session::{Message, ThreadId};

/// Identifies the conversation a dispatch originated from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LaneKey {
    /// A thread from the roster.
    Thread(ThreadId),
    /// The unsaved conversation opened by a new session of this generation.
    Draft(u64),
}

/// One user turn waiting for its reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// Text sent to the chat endpoint.
    pub prompt: String,
    /// The user message as appended to the history.
    pub user: Message,
}

/// Result of resolving a lane's in-flight turn.
#[derive(Debug)]
pub struct Resolved {
    /// The turn that was answered.
    pub turn: Turn,
    /// User messages of this lane appended after `turn.user`.
    pub later: usize,
    /// Turn to send next, already marked in flight.
    pub next: Option<Turn>,
}

#[derive(Debug, Default)]
struct Lane {
    in_flight: Option<Turn>,
    queued: VecDeque<Turn>,
}

#[derive(Debug, Default)]
pub struct DispatchLanes {
    lanes: HashMap<LaneKey, Lane>,
}

impl DispatchLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new turn.  Returns it back when it should be sent now.
    pub fn enqueue(&mut self, key: LaneKey, turn: Turn) -> Option<Turn> {
        let lane = self.lanes.entry(key).or_default();
        if lane.in_flight.is_none() {
            lane.in_flight = Some(turn.clone());
            Some(turn)
        } else {
            lane.queued.push_back(turn);
            None
        }
    }

    /// Resolve the in-flight turn of `key` and promote the next queued one.
    pub fn resolve(&mut self, key: &LaneKey) -> Option<Resolved> {
        let lane = self.lanes.get_mut(key)?;
        let turn = lane.in_flight.take()?;
        let later = lane.queued.len();
        let next = lane.queued.pop_front();
        lane.in_flight = next.clone();
        if lane.in_flight.is_none() {
            self.lanes.remove(key);
        }
        Some(Resolved { turn, later, next })
    }

    /// Turns of `key` still waiting for a reply, including the in-flight one.
    pub fn awaiting(&self, key: &LaneKey) -> usize {
        self.lanes
            .get(key)
            .map_or(0, |lane| lane.in_flight.iter().count() + lane.queued.len())
    }
}

/// Insert `reply` directly after the user message of `resolved` in
/// `history`.
///
/// Returns `false` without touching `history` when the expected user message
/// is not where the lane bookkeeping says it is (the history was replaced
/// underneath the pending turn).
pub fn place_reply(history: &mut Vec<Message>, resolved: &Resolved, reply: &Message) -> bool {
    let Some(slot) = history.len().checked_sub(resolved.later) else {
        return false;
    };
    if slot == 0 || history[slot - 1] != resolved.turn.user {
        return false;
    }
    if !history[slot..].iter().all(Message::is_user) {
        return false;
    }
    history.insert(slot, reply.clone());
    true
}
