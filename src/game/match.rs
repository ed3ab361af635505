//! Match state and authoritative tick loop

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::store::{dispatch, MatchResult, MatchResultSink};
use crate::util::time::tick_duration;
use crate::ws::protocol::{ServerMsg, Side};

use super::physics::{Ball, PhysicsSystem, INITIAL_PADDLE_Y, WIN_SCORE};
use super::snapshot::GameStateView;

/// Match identifier, derived from the left participant as `room_<connection id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(String);

impl MatchId {
    pub fn for_pairing(left: ConnectionId) -> Self {
        Self(format!("room_{}", left))
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Constructed, tick loop not yet started
    Initializing,
    /// Ticking
    Running,
    /// Over; no transitions out
    Terminated,
}

/// What a single tick produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Match continues; broadcast the new state
    Running,
    /// This tick ended the match
    Won(Side),
    /// Ball state went non-finite; the match was aborted
    Faulted,
    /// Match was not running, nothing happened
    Halted,
}

/// Authoritative match state (owned by the match task)
#[derive(Debug, Clone)]
pub struct MatchState {
    pub id: MatchId,
    pub left: ConnectionId,
    pub right: ConnectionId,
    pub phase: MatchPhase,
    pub tick: u64,
    pub ball: Ball,
    pub left_paddle_y: f64,
    pub right_paddle_y: f64,
    pub left_score: u32,
    pub right_score: u32,
    winner: Option<Side>,
}

impl MatchState {
    pub fn new(id: MatchId, left: ConnectionId, right: ConnectionId) -> Self {
        Self {
            id,
            left,
            right,
            phase: MatchPhase::Initializing,
            tick: 0,
            ball: Ball::kickoff(),
            left_paddle_y: INITIAL_PADDLE_Y,
            right_paddle_y: INITIAL_PADDLE_Y,
            left_score: 0,
            right_score: 0,
            winner: None,
        }
    }

    /// Enter `Running`. Only valid from `Initializing`.
    pub fn start(&mut self) -> bool {
        if self.phase == MatchPhase::Initializing {
            self.phase = MatchPhase::Running;
            true
        } else {
            false
        }
    }

    pub fn participant(&self, side: Side) -> ConnectionId {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn score(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.left_score,
            Side::Right => self.right_score,
        }
    }

    pub fn winner(&self) -> Option<Side> {
        self.winner
    }

    /// Last write wins; the value is taken as-is
    pub fn move_paddle(&mut self, side: Side, y: f64) {
        match side {
            Side::Left => self.left_paddle_y = y,
            Side::Right => self.right_paddle_y = y,
        }
    }

    /// Advance the simulation by one tick
    pub fn step(&mut self) -> TickOutcome {
        if self.phase != MatchPhase::Running {
            return TickOutcome::Halted;
        }
        self.tick += 1;

        PhysicsSystem::integrate(&mut self.ball);
        PhysicsSystem::reflect_walls(&mut self.ball);
        PhysicsSystem::resolve_paddles(&mut self.ball, self.left_paddle_y, self.right_paddle_y);

        if let Some(scorer) = PhysicsSystem::scoring_side(&self.ball) {
            match scorer {
                Side::Left => self.left_score += 1,
                Side::Right => self.right_score += 1,
            }
            self.ball.recenter(scorer.opponent());
        }

        if !self.ball.is_finite() {
            self.phase = MatchPhase::Terminated;
            return TickOutcome::Faulted;
        }

        // Left is checked first so a simultaneous threshold resolves deterministically
        let winner = if self.left_score >= WIN_SCORE {
            Some(Side::Left)
        } else if self.right_score >= WIN_SCORE {
            Some(Side::Right)
        } else {
            None
        };

        match winner {
            Some(side) => {
                self.terminate(side);
                TickOutcome::Won(side)
            }
            None => TickOutcome::Running,
        }
    }

    /// End the match because `loser` left. Returns the winner if the match was still live.
    pub fn forfeit(&mut self, loser: Side) -> Option<Side> {
        let winner = loser.opponent();
        self.terminate(winner).then_some(winner)
    }

    /// Transition to `Terminated`. Returns false if already there.
    fn terminate(&mut self, winner: Side) -> bool {
        if self.phase == MatchPhase::Terminated {
            return false;
        }
        self.phase = MatchPhase::Terminated;
        self.winner = Some(winner);
        true
    }

    /// Outcome record, available once a winner is decided
    pub fn result(&self, completed_at: DateTime<Utc>) -> Option<MatchResult> {
        let winner = self.winner()?;
        let loser = winner.opponent();
        Some(MatchResult {
            winner_id: self.participant(winner),
            loser_id: self.participant(loser),
            winner_score: self.score(winner),
            loser_score: self.score(loser),
            completed_at,
        })
    }
}

/// Commands delivered to a running match from outside its task
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchCommand {
    MovePaddle { side: Side, y: f64 },
    Forfeit { side: Side },
}

/// Handle to a running match
#[derive(Debug, Clone)]
pub struct MatchHandle {
    pub id: MatchId,
    pub left: ConnectionId,
    pub right: ConnectionId,
    command_tx: mpsc::UnboundedSender<MatchCommand>,
}

impl MatchHandle {
    pub fn side_of(&self, connection_id: ConnectionId) -> Option<Side> {
        if connection_id == self.left {
            Some(Side::Left)
        } else if connection_id == self.right {
            Some(Side::Right)
        } else {
            None
        }
    }

    /// Non-blocking; false once the match task has exited
    pub fn send(&self, command: MatchCommand) -> bool {
        self.command_tx.send(command).is_ok()
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<MatchId, MatchHandle>,
    /// Which match each participant is in
    participants: DashMap<ConnectionId, MatchId>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
            participants: DashMap::new(),
        }
    }

    pub fn get(&self, id: &MatchId) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    /// Register a match. Rejected if the id is taken or either participant is already playing.
    pub fn insert(&self, handle: MatchHandle) -> bool {
        if self.matches.contains_key(&handle.id)
            || self.is_matched(handle.left)
            || self.is_matched(handle.right)
        {
            return false;
        }
        self.participants.insert(handle.left, handle.id.clone());
        self.participants.insert(handle.right, handle.id.clone());
        self.matches.insert(handle.id.clone(), handle);
        true
    }

    /// Drop a match and its participant index entries
    pub fn remove(&self, id: &MatchId) -> Option<MatchHandle> {
        let (_, handle) = self.matches.remove(id)?;
        for participant in [handle.left, handle.right] {
            self.participants.remove_if(&participant, |_, match_id| match_id == id);
        }
        Some(handle)
    }

    /// The match a connection is currently playing in
    pub fn match_for(&self, connection_id: ConnectionId) -> Option<MatchHandle> {
        let match_id = self.participants.get(&connection_id).map(|r| r.value().clone())?;
        self.get(&match_id)
    }

    pub fn is_matched(&self, connection_id: ConnectionId) -> bool {
        self.participants.contains_key(&connection_id)
    }

    /// Tell a connection's match that it has left. False if it was not playing.
    pub fn forfeit(&self, connection_id: ConnectionId) -> bool {
        let Some(handle) = self.match_for(connection_id) else {
            return false;
        };
        match handle.side_of(connection_id) {
            Some(side) => handle.send(MatchCommand::Forfeit { side }),
            None => false,
        }
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared collaborators every match task needs
#[derive(Clone)]
pub struct MatchContext {
    pub matches: Arc<MatchRegistry>,
    pub connections: Arc<ConnectionRegistry>,
    pub sink: Arc<dyn MatchResultSink>,
}

/// A match's claim on its registry slot. Released exactly once, on drop at the latest.
struct MatchLease {
    id: MatchId,
    registry: Arc<MatchRegistry>,
    released: bool,
}

impl MatchLease {
    fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.registry.remove(&self.id).is_some()
    }
}

impl Drop for MatchLease {
    fn drop(&mut self) {
        if !self.released {
            warn!(match_id = %self.id, "Match task exited without terminating");
            self.release();
        }
    }
}

/// The authoritative game match
pub struct GameMatch {
    state: MatchState,
    command_rx: mpsc::UnboundedReceiver<MatchCommand>,
    connections: Arc<ConnectionRegistry>,
    sink: Arc<dyn MatchResultSink>,
    lease: MatchLease,
}

impl GameMatch {
    /// Register a match for the pair and start its tick task.
    /// Returns None if the registry rejects the pairing.
    pub fn spawn(
        left: ConnectionId,
        right: ConnectionId,
        ctx: &MatchContext,
    ) -> Option<(MatchHandle, JoinHandle<Option<MatchResult>>)> {
        let id = MatchId::for_pairing(left);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = MatchHandle {
            id: id.clone(),
            left,
            right,
            command_tx,
        };
        if !ctx.matches.insert(handle.clone()) {
            warn!(match_id = %id, "Match registration rejected");
            return None;
        }

        let game_match = Self {
            state: MatchState::new(id.clone(), left, right),
            command_rx,
            connections: ctx.connections.clone(),
            sink: ctx.sink.clone(),
            lease: MatchLease {
                id,
                registry: ctx.matches.clone(),
                released: false,
            },
        };

        let task = tokio::spawn(game_match.run());
        Some((handle, task))
    }

    /// Run the authoritative tick loop until the match terminates
    pub async fn run(mut self) -> Option<MatchResult> {
        self.state.start();
        info!(
            match_id = %self.state.id,
            left = %self.state.left,
            right = %self.state.right,
            "Match started"
        );

        let mut tick_interval = interval(tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            // Drain paddle moves and forfeits
            self.process_commands();

            match self.state.step() {
                TickOutcome::Running => {
                    let view = GameStateView::from(&self.state);
                    self.broadcast(ServerMsg::UpdateState(view));
                }
                TickOutcome::Won(_) | TickOutcome::Halted => break,
                TickOutcome::Faulted => {
                    error!(
                        match_id = %self.state.id,
                        left = %self.state.left,
                        right = %self.state.right,
                        tick = self.state.tick,
                        ball = ?self.state.ball,
                        "Ball state is no longer finite, aborting match"
                    );
                    break;
                }
            }
        }

        drop(tick_interval);
        self.finish()
    }

    /// Apply all pending commands from the match channel
    fn process_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                MatchCommand::MovePaddle { side, y } => self.state.move_paddle(side, y),
                MatchCommand::Forfeit { side } => {
                    if let Some(winner) = self.state.forfeit(side) {
                        info!(
                            match_id = %self.state.id,
                            loser = %self.state.participant(side),
                            winner = %self.state.participant(winner),
                            "Participant left, match forfeited"
                        );
                    }
                }
            }
        }
    }

    /// Release the registry slot, announce the winner, hand off the result
    fn finish(mut self) -> Option<MatchResult> {
        self.lease.release();

        let result = self.state.result(Utc::now());
        match &result {
            Some(result) => {
                info!(
                    match_id = %self.state.id,
                    winner = %result.winner_id,
                    left_score = self.state.left_score,
                    right_score = self.state.right_score,
                    ticks = self.state.tick,
                    "Match ended"
                );
                self.broadcast(ServerMsg::GameOver {
                    winner: result.winner_id,
                });
                dispatch(self.sink.clone(), result.clone());
            }
            None => {
                warn!(match_id = %self.state.id, "Match ended without a winner");
            }
        }

        result
    }

    /// Send to both participants; a participant that has gone away is skipped
    fn broadcast(&self, msg: ServerMsg) {
        for participant in [self.state.left, self.state.right] {
            if !self.connections.send(participant, msg.clone()) {
                debug!(match_id = %self.state.id, connection_id = %participant, "Participant unreachable");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::{BALL_BASE_SPEED, COURT_HEIGHT};
    use crate::store::results::testing::MemoryResultSink;

    fn running_state() -> MatchState {
        let left = ConnectionId::new();
        let mut state = MatchState::new(MatchId::for_pairing(left), left, ConnectionId::new());
        assert!(state.start());
        state
    }

    fn context() -> (MatchContext, MemoryResultSink) {
        let sink = MemoryResultSink::default();
        let ctx = MatchContext {
            matches: Arc::new(MatchRegistry::new()),
            connections: Arc::new(ConnectionRegistry::new()),
            sink: Arc::new(sink.clone()),
        };
        (ctx, sink)
    }

    #[test]
    fn new_match_has_kickoff_conditions() {
        let left = ConnectionId::new();
        let right = ConnectionId::new();
        let state = MatchState::new(MatchId::for_pairing(left), left, right);

        assert_eq!(state.phase, MatchPhase::Initializing);
        assert_eq!(state.id.to_string(), format!("room_{}", left));
        assert_eq!((state.ball.x, state.ball.y), (400.0, 300.0));
        assert_eq!((state.left_paddle_y, state.right_paddle_y), (250.0, 250.0));
        assert_eq!((state.left_score, state.right_score), (0, 0));
    }

    #[test]
    fn step_before_start_is_halted() {
        let left = ConnectionId::new();
        let mut state = MatchState::new(MatchId::for_pairing(left), left, ConnectionId::new());
        assert_eq!(state.step(), TickOutcome::Halted);
        assert_eq!(state.tick, 0);
    }

    #[test]
    fn left_paddle_reflects_and_speeds_up() {
        let mut state = running_state();
        state.ball = Ball { x: 55.0, y: 300.0, dx: -5.0, dy: 0.0 };
        state.left_paddle_y = 260.0;

        assert_eq!(state.step(), TickOutcome::Running);
        assert!(state.ball.dx > 0.0);
        assert!(state.ball.dx.abs() > BALL_BASE_SPEED);
    }

    #[test]
    fn rally_heading_left_is_returned_by_left_paddle() {
        let mut state = running_state();
        state.ball = Ball { x: 400.0, y: 300.0, dx: -BALL_BASE_SPEED, dy: -BALL_BASE_SPEED };

        let mut left_returns = 0;
        let mut right_returns = 0;
        for _ in 0..2_000 {
            // Both players keep the paddle centred on the ball
            state.move_paddle(Side::Left, state.ball.y - 50.0);
            state.move_paddle(Side::Right, state.ball.y - 50.0);

            let heading_left = state.ball.dx < 0.0;
            assert_eq!(state.step(), TickOutcome::Running);
            match (heading_left, state.ball.dx < 0.0) {
                (true, false) => left_returns += 1,
                (false, true) => right_returns += 1,
                _ => {}
            }
            if left_returns >= 3 {
                break;
            }
        }

        assert_eq!(left_returns, 3);
        assert!(right_returns >= 2);
        assert_eq!((state.left_score, state.right_score), (0, 0));
    }

    #[test]
    fn ball_outside_paddle_passes_through_and_scores_for_opponent() {
        let mut state = running_state();
        state.ball = Ball { x: 55.0, y: 300.0, dx: -5.0, dy: 0.0 };
        state.left_paddle_y = 0.0;

        assert_eq!(state.step(), TickOutcome::Running);
        assert_eq!(state.ball.dx, -5.0);

        while state.right_score == 0 {
            assert_eq!(state.step(), TickOutcome::Running);
            assert_eq!(state.left_score, 0);
        }
        assert_eq!(state.right_score, 1);
    }

    #[test]
    fn left_exit_scores_right_and_serves_toward_left() {
        let mut state = running_state();
        state.ball = Ball { x: 3.0, y: 120.0, dx: -7.2, dy: -5.0 };
        state.left_paddle_y = 500.0;

        state.step();
        assert_eq!((state.left_score, state.right_score), (0, 1));
        assert_eq!((state.ball.x, state.ball.y), (400.0, 300.0));
        assert_eq!(state.ball.dx, -BALL_BASE_SPEED);
    }

    #[test]
    fn right_exit_scores_left_and_serves_toward_right() {
        let mut state = running_state();
        state.ball = Ball { x: 797.0, y: 120.0, dx: 6.0, dy: 5.0 };
        state.right_paddle_y = 500.0;

        state.step();
        assert_eq!((state.left_score, state.right_score), (1, 0));
        assert_eq!((state.ball.x, state.ball.y), (400.0, 300.0));
        assert_eq!(state.ball.dx, BALL_BASE_SPEED);
    }

    #[test]
    fn scores_never_decrease_or_change_together() {
        let mut state = running_state();
        let mut paddles = 0.0;

        for _ in 0..200_000 {
            // Sweep the paddles so some rallies happen and some are missed
            paddles = (paddles + 7.0) % COURT_HEIGHT;
            state.move_paddle(Side::Left, paddles);
            state.move_paddle(Side::Right, COURT_HEIGHT - paddles);

            let before = (state.left_score, state.right_score);
            let outcome = state.step();
            let after = (state.left_score, state.right_score);

            assert!(after.0 >= before.0 && after.1 >= before.1);
            assert!(after.0 - before.0 + after.1 - before.1 <= 1);
            if outcome != TickOutcome::Running {
                break;
            }
        }
        assert_eq!(state.phase, MatchPhase::Terminated);
    }

    #[test]
    fn reaching_threshold_terminates_once() {
        let mut state = running_state();
        state.left_score = WIN_SCORE - 1;
        state.ball = Ball { x: 798.0, y: 100.0, dx: 5.0, dy: 5.0 };
        state.right_paddle_y = 400.0;

        assert_eq!(state.step(), TickOutcome::Won(Side::Left));
        assert_eq!(state.phase, MatchPhase::Terminated);
        assert_eq!(state.step(), TickOutcome::Halted);
        assert_eq!(state.forfeit(Side::Left), None);
        assert_eq!(state.winner(), Some(Side::Left));
    }

    #[test]
    fn simultaneous_threshold_favors_left() {
        let mut state = running_state();
        state.left_score = WIN_SCORE;
        state.right_score = WIN_SCORE;

        assert_eq!(state.step(), TickOutcome::Won(Side::Left));
    }

    #[test]
    fn non_finite_ball_faults_the_match() {
        let mut state = running_state();
        state.ball.dy = f64::NAN;

        assert_eq!(state.step(), TickOutcome::Faulted);
        assert_eq!(state.phase, MatchPhase::Terminated);
        assert!(state.result(Utc::now()).is_none());
    }

    #[test]
    fn forfeit_awards_opponent_with_current_scores() {
        let mut state = running_state();
        state.left_score = 4;
        state.right_score = 2;

        assert_eq!(state.forfeit(Side::Left), Some(Side::Right));
        let result = state.result(Utc::now()).unwrap();
        assert_eq!(result.winner_id, state.right);
        assert_eq!(result.loser_id, state.left);
        assert_eq!((result.winner_score, result.loser_score), (2, 4));
    }

    #[test]
    fn registry_rejects_participant_in_two_matches() {
        let (ctx, _sink) = context();
        let a = ConnectionId::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = MatchHandle {
            id: MatchId::for_pairing(a),
            left: a,
            right: ConnectionId::new(),
            command_tx: tx.clone(),
        };
        let c = ConnectionId::new();
        let second = MatchHandle {
            id: MatchId::for_pairing(c),
            left: c,
            right: a,
            command_tx: tx,
        };

        assert!(ctx.matches.insert(first.clone()));
        assert!(!ctx.matches.insert(second));
        assert_eq!(ctx.matches.active_matches(), 1);

        assert!(ctx.matches.remove(&first.id).is_some());
        assert!(ctx.matches.remove(&first.id).is_none());
        assert!(!ctx.matches.is_matched(a));
    }

    #[tokio::test(start_paused = true)]
    async fn running_match_broadcasts_state_to_both_participants() {
        let (ctx, _sink) = context();
        let (a, mut rx_a) = ctx.connections.connect();
        let (b, mut rx_b) = ctx.connections.connect();

        let (handle, task) = GameMatch::spawn(a, b, &ctx).unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await {
                Some(ServerMsg::UpdateState(view)) => {
                    assert_eq!(view.ball.x, 405.0);
                    assert_eq!((view.left_score, view.right_score), (0, 0));
                }
                other => panic!("expected updateState, got {other:?}"),
            }
        }

        assert!(handle.send(MatchCommand::Forfeit { side: Side::Right }));
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.winner_id, a);
    }

    #[tokio::test(start_paused = true)]
    async fn termination_releases_registry_and_persists_once() {
        let (ctx, sink) = context();
        let (a, mut rx_a) = ctx.connections.connect();
        let (b, _rx_b) = ctx.connections.connect();

        let (handle, task) = GameMatch::spawn(a, b, &ctx).unwrap();
        assert!(ctx.matches.is_matched(a));

        handle.send(MatchCommand::Forfeit { side: Side::Left });
        handle.send(MatchCommand::Forfeit { side: Side::Right });
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.winner_id, b);

        assert_eq!(ctx.matches.active_matches(), 0);
        assert!(!ctx.matches.is_matched(a) && !ctx.matches.is_matched(b));
        assert!(!handle.send(MatchCommand::MovePaddle { side: Side::Left, y: 0.0 }));

        // Let the detached persistence task run
        tokio::task::yield_now().await;
        tokio::time::sleep(tick_duration()).await;
        assert_eq!(sink.results(), vec![result]);

        let mut game_overs = 0;
        while let Ok(msg) = rx_a.try_recv() {
            if let ServerMsg::GameOver { winner } = msg {
                assert_eq!(winner, b);
                game_overs += 1;
            }
        }
        assert_eq!(game_overs, 1);
    }
}
