//! Authoritative simulation.
//!
//! Owns the world, the physics adapter and every session record. All world
//! mutation happens through `&mut Simulation`, so network handlers and the
//! tick never interleave.
//!
//! Tick order (never reordered or skipped):
//! 1. physics lifecycle sync
//! 2. engine step
//! 3. pose writeback
//! 4. gameplay: contacts, then intents
//! 5. broadcast to subscribers
//! 6. intent reset

use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use rand::{rngs::StdRng, SeedableRng};
use splat_shared::{
    components::{DebugCollider, PhysicsBody},
    config::SandboxConfig,
    ecs::{EntityId, World},
    event::EventBus,
    net::{encode_frame, DebugOptions, InputIntent, JoinRequest, ServerMsg, SessionId},
    physics::PhysicsBackend,
    snapshot::{Snapshot, SnapshotCodec},
};
use tracing::{debug, info, warn};

use crate::{
    gameplay,
    physics::{physics_query, PhysicsAdapter},
    session::{SessionError, SessionManager},
    spawn::{self, TestContent},
    tick::FixedTimestep,
};

/// Sink for encoded frames addressed to one session. Fire-and-forget.
pub trait Outbox {
    fn send(&mut self, session: SessionId, frame: Bytes);
}

impl Outbox for Vec<(SessionId, Bytes)> {
    fn send(&mut self, session: SessionId, frame: Bytes) {
        self.push((session, frame));
    }
}

pub struct Simulation<B> {
    cfg: SandboxConfig,
    world: World,
    physics: PhysicsAdapter<B>,
    events: EventBus,
    sessions: SessionManager,
    codec: SnapshotCodec,
    rng: StdRng,
    timestep: FixedTimestep,
    test_content: TestContent,
    floor: EntityId,
    global_debug: bool,
}

impl<B: PhysicsBackend> Simulation<B> {
    /// Builds the world: floor plus test content when enabled.
    pub fn new(cfg: SandboxConfig, backend: B) -> Self {
        let mut world = World::default();
        let mut rng = match cfg.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let floor = spawn::spawn_floor(&mut world);
        let mut test_content = TestContent::default();
        if cfg.spawn_test_content {
            test_content.populate(&mut world, &mut rng, &cfg.gameplay);
        }

        Self {
            timestep: FixedTimestep::new(cfg.tick_hz),
            global_debug: cfg.global_debug,
            cfg,
            world,
            physics: PhysicsAdapter::new(backend),
            events: EventBus::default(),
            sessions: SessionManager::default(),
            codec: SnapshotCodec::synchronized(),
            rng,
            test_content,
            floor,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.cfg
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn physics(&self) -> &PhysicsAdapter<B> {
        &self.physics
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn tick(&self) -> u64 {
        self.timestep.tick()
    }

    pub fn floor(&self) -> EntityId {
        self.floor
    }

    pub fn global_debug(&self) -> bool {
        self.global_debug
    }

    pub fn set_global_debug(&mut self, enabled: bool) {
        self.global_debug = enabled;
    }

    // ─── Sessions ───

    pub fn connect(&mut self, id: SessionId, peer: Option<SocketAddr>) {
        self.sessions.connect(id, peer);
        info!(session = ?id, peer = ?peer, "Session connected");
    }

    pub fn subscribe(&mut self, id: SessionId) -> Result<(), SessionError> {
        self.sessions.set_subscribed(id, true)
    }

    pub fn unsubscribe(&mut self, id: SessionId) -> Result<(), SessionError> {
        self.sessions.set_subscribed(id, false)
    }

    /// Spawns the session's player and returns the join reply snapshot,
    /// the only snapshot that carries `Owner`.
    pub fn join(&mut self, id: SessionId, request: JoinRequest) -> anyhow::Result<Snapshot> {
        let session = self.sessions.get(id)?;
        if let Some(entity) = session.entity {
            return Err(SessionError::AlreadyInGame { session: id, entity }.into());
        }

        let was_subscribed = session.subscribed;
        let entity = spawn::spawn_player(&mut self.world, &mut self.rng, &self.cfg.gameplay);
        let session = self.sessions.get_mut(id)?;
        session.entity = Some(entity);
        session.subscribed = true;
        session.debug = request.debug;
        // Only the newcomer; other players' wireframes stay as they are.
        if request.debug.collider_wireframes {
            self.world.mark::<DebugCollider>(entity);
        }

        match self.snapshot() {
            Ok(snapshot) => {
                info!(session = ?id, entity = ?entity, "Player joined");
                Ok(snapshot.with_owner(entity))
            }
            Err(e) => {
                self.undo_join(id, was_subscribed);
                Err(e.context("encode join reply"))
            }
        }
    }

    /// [`Simulation::join`], encoded as the `joined` frame. A reply that
    /// cannot be framed undoes the join.
    pub fn join_frame(&mut self, id: SessionId, request: JoinRequest) -> anyhow::Result<Bytes> {
        let was_subscribed = self.sessions.get(id)?.subscribed;
        let snapshot = self.join(id, request)?;
        encode_frame(&ServerMsg::Joined(snapshot)).map_err(|e| {
            self.undo_join(id, was_subscribed);
            e.context("encode join reply")
        })
    }

    fn undo_join(&mut self, id: SessionId, was_subscribed: bool) {
        if let Ok(entity) = self.leave(id) {
            warn!(session = ?id, entity = ?entity, "Join rolled back");
        }
        if !was_subscribed {
            let _ = self.sessions.set_subscribed(id, false);
        }
    }

    /// Destroys the session's player and its body right away.
    pub fn leave(&mut self, id: SessionId) -> Result<EntityId, SessionError> {
        let session = self.sessions.get_mut(id)?;
        let entity = session.entity.take().ok_or(SessionError::NotInGame(id))?;
        self.world.despawn(entity);
        self.physics.detach(entity);
        info!(session = ?id, entity = ?entity, "Player left");
        Ok(entity)
    }

    pub fn input(&mut self, id: SessionId, intent: InputIntent) -> Result<(), SessionError> {
        self.sessions.set_intent(id, intent)
    }

    /// Updates the session's collider visibility preference.
    pub fn set_debug(&mut self, id: SessionId, options: DebugOptions) -> Result<(), SessionError> {
        let session = self.sessions.get_mut(id)?;
        session.debug = options;
        let entity = session.entity;
        self.apply_debug(entity, options);
        Ok(())
    }

    fn apply_debug(&mut self, own: Option<EntityId>, options: DebugOptions) {
        let targets = if self.global_debug {
            self.world.query(&physics_query())
        } else {
            own.into_iter().collect()
        };
        for entity in targets {
            if options.collider_wireframes {
                self.world.mark::<DebugCollider>(entity);
            } else {
                self.world.unmark::<DebugCollider>(entity);
            }
        }
    }

    /// Connection closed: same as `leave`, then the record is dropped.
    pub fn disconnect(&mut self, id: SessionId) {
        match self.leave(id) {
            Ok(_) | Err(SessionError::NotInGame(_)) => {}
            Err(e) => debug!(error = %e, "Disconnect of unknown session"),
        }
        if self.sessions.remove(id).is_some() {
            info!(session = ?id, "Session disconnected");
        }
    }

    // ─── Ticking ───

    /// Feeds wall-clock time in and runs every whole step that is due.
    /// Returns how many steps ran.
    pub fn advance(&mut self, elapsed: Duration, outbox: &mut impl Outbox) -> anyhow::Result<u32> {
        self.timestep.accumulate(elapsed);
        let mut steps = 0;
        while let Some(tick) = self.timestep.next_step() {
            self.run_step(tick, outbox)?;
            steps += 1;
        }
        Ok(steps)
    }

    /// Runs exactly one step regardless of the accumulator.
    pub fn step(&mut self, outbox: &mut impl Outbox) -> anyhow::Result<()> {
        self.timestep.accumulate_secs(self.timestep.dt());
        match self.timestep.next_step() {
            Some(tick) => self.run_step(tick, outbox),
            None => Ok(()),
        }
    }

    fn run_step(&mut self, tick: u64, outbox: &mut impl Outbox) -> anyhow::Result<()> {
        self.physics.sync_lifecycle(&mut self.world);
        self.physics
            .step(self.timestep.dt() as f32, &mut self.events);
        self.physics.write_back(&mut self.world);

        gameplay::apply_contacts(
            &mut self.world,
            &mut self.physics,
            &mut self.events,
            &self.cfg.gameplay,
        );
        let intents = self.sessions.player_intents();
        gameplay::apply_intents(
            &mut self.world,
            &mut self.physics,
            &intents,
            &self.cfg.gameplay,
        );

        if let Err(e) = self.broadcast(tick, outbox) {
            warn!(tick, error = %e, "Broadcast skipped");
        }
        self.sessions.reset_intents();
        Ok(())
    }

    fn broadcast(&self, tick: u64, outbox: &mut impl Outbox) -> anyhow::Result<()> {
        let mut subscribers = self.sessions.subscribers().peekable();
        if subscribers.peek().is_none() {
            return Ok(());
        }
        let snapshot = self.codec.encode(&self.world, tick)?;
        let frame = encode_frame(&ServerMsg::Update(snapshot))?;
        for id in subscribers {
            outbox.send(id, frame.clone());
        }
        Ok(())
    }

    /// Snapshot of the current world, without `Owner`.
    pub fn snapshot(&self) -> anyhow::Result<Snapshot> {
        self.codec.encode(&self.world, self.tick())
    }

    // ─── Administration ───

    /// Destroys and respawns the crates, mats and loose balls.
    pub fn reset_test_content(&mut self) {
        self.test_content
            .populate(&mut self.world, &mut self.rng, &self.cfg.gameplay);
        info!(entities = self.test_content.entities().len(), "Test content reset");
    }

    /// Replaces the test content with a brick pyramid.
    pub fn build_test_wall(&mut self, width: u32) {
        self.test_content.build_wall(&mut self.world, width);
        info!(width, bricks = self.test_content.entities().len(), "Test wall built");
    }

    /// Operator summary.
    pub fn status(&self) -> Vec<String> {
        let mut out = vec![
            format!("Tick: {}", self.tick()),
            format!(
                "Entities: {} ({} with bodies)",
                self.world.len(),
                self.physics.len()
            ),
            format!("Sessions: {}", self.sessions.len()),
        ];
        for s in self.sessions.iter() {
            out.push(format!(
                "  {:?}: peer={:?} subscribed={} entity={:?}",
                s.id, s.peer, s.subscribed, s.entity
            ));
        }
        out
    }

    /// Physics-enabled entity count, for tests and `status`.
    pub fn physics_entities(&self) -> usize {
        self.world.with::<PhysicsBody>().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rapier_backend::RapierBackend;
    use splat_shared::{
        components::{Color, Owner, Player, Position},
        net::decode_payload,
        physics::PhysicsConfig,
    };

    fn sim() -> Simulation<RapierBackend> {
        let cfg = SandboxConfig {
            spawn_test_content: false,
            global_debug: false,
            rng_seed: Some(42),
            ..SandboxConfig::default()
        };
        Simulation::new(cfg, RapierBackend::new(PhysicsConfig::default()))
    }

    fn session(sim: &mut Simulation<RapierBackend>) -> SessionId {
        let id = SessionId::new_unique();
        sim.connect(id, None);
        id
    }

    fn updates(outbox: &[(SessionId, Bytes)], to: SessionId) -> Vec<Snapshot> {
        outbox
            .iter()
            .filter(|(id, _)| *id == to)
            .map(|(_, frame)| match decode_payload(&frame[4..]).unwrap() {
                ServerMsg::Update(snapshot) => snapshot,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn join_twice_keeps_the_first_player() {
        let mut sim = sim();
        let id = session(&mut sim);
        sim.join(id, JoinRequest::default()).unwrap();
        let entity = sim.sessions().get(id).unwrap().entity.unwrap();

        let err = sim.join(id, JoinRequest::default()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SessionError>(),
            Some(&SessionError::AlreadyInGame { session: id, entity })
        );
        assert_eq!(sim.sessions().get(id).unwrap().entity, Some(entity));
        assert_eq!(sim.world().with::<Player>(), vec![entity]);
    }

    #[test]
    fn owner_only_travels_in_the_join_reply() {
        let mut sim = sim();
        let a = session(&mut sim);
        let b = session(&mut sim);
        let reply_a = sim.join(a, JoinRequest::default()).unwrap();
        let reply_b = sim.join(b, JoinRequest::default()).unwrap();
        let ea = sim.sessions().get(a).unwrap().entity.unwrap();
        let eb = sim.sessions().get(b).unwrap().entity.unwrap();

        assert_eq!(reply_a.owner(), Some(ea));
        assert_eq!(reply_b.owner(), Some(eb));
        assert!(reply_b.get::<Player>(ea).unwrap().is_some());
        assert!(!reply_b.has_marker::<Owner>(ea));

        let mut outbox = Vec::new();
        sim.step(&mut outbox).unwrap();
        let update = updates(&outbox, a).pop().unwrap();
        assert!(update.table("Owner").is_none());
    }

    #[test]
    fn body_exists_after_one_step_and_leave_removes_it_at_once() {
        let mut sim = sim();
        let id = session(&mut sim);
        sim.join(id, JoinRequest::default()).unwrap();
        let entity = sim.sessions().get(id).unwrap().entity.unwrap();
        assert!(sim.physics().body_of(entity).is_none());

        sim.step(&mut Vec::new()).unwrap();
        let body = sim.physics().body_of(entity).unwrap();
        assert!(sim.physics().backend().contains(body));

        assert_eq!(sim.leave(id), Ok(entity));
        assert!(!sim.world().is_alive(entity));
        assert!(!sim.physics().backend().contains(body));
        assert!(sim.sessions().get(id).unwrap().subscribed);

        sim.step(&mut Vec::new()).unwrap();
        assert_eq!(sim.leave(id), Err(SessionError::NotInGame(id)));
    }

    #[test]
    fn broadcasts_reach_subscribers_only() {
        let mut sim = sim();
        let spectator = session(&mut sim);
        let lurker = session(&mut sim);
        sim.subscribe(spectator).unwrap();

        let mut outbox = Vec::new();
        sim.step(&mut outbox).unwrap();
        let got = updates(&outbox, spectator);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].tick, 1);
        assert!(got[0].entities().contains(&sim.floor()));
        assert!(updates(&outbox, lurker).is_empty());

        sim.unsubscribe(spectator).unwrap();
        outbox.clear();
        sim.step(&mut outbox).unwrap();
        assert!(outbox.is_empty());
    }

    #[test]
    fn late_wake_up_runs_two_steps() {
        let mut sim = sim();
        let steps = sim
            .advance(Duration::from_millis(80), &mut Vec::new())
            .unwrap();
        assert_eq!(steps, 2);
        assert_eq!(sim.tick(), 2);
    }

    #[test]
    fn intent_is_reset_after_each_tick() {
        let mut sim = sim();
        let id = session(&mut sim);
        sim.join(id, JoinRequest::default()).unwrap();
        sim.input(
            id,
            InputIntent {
                move_x: 1.0,
                ..InputIntent::default()
            },
        )
        .unwrap();
        sim.step(&mut Vec::new()).unwrap();
        assert!(sim.sessions().get(id).unwrap().intent.is_neutral());
    }

    #[test]
    fn debug_toggles_own_collider_or_all_in_global_mode() {
        let mut sim = sim();
        let id = session(&mut sim);
        let wireframes = DebugOptions {
            collider_wireframes: true,
        };
        sim.join(id, JoinRequest { debug: wireframes }).unwrap();
        let entity = sim.sessions().get(id).unwrap().entity.unwrap();
        assert_eq!(
            sim.world().marked::<DebugCollider>().collect::<Vec<_>>(),
            vec![entity]
        );

        sim.set_debug(id, DebugOptions::default()).unwrap();
        assert_eq!(sim.world().marked::<DebugCollider>().count(), 0);

        sim.set_global_debug(true);
        sim.set_debug(id, wireframes).unwrap();
        assert_eq!(
            sim.world().marked::<DebugCollider>().count(),
            sim.physics_entities()
        );
        assert!(sim.world().has::<DebugCollider>(sim.floor()));
    }

    #[test]
    fn joining_in_global_mode_leaves_other_wireframes_alone() {
        let mut sim = sim();
        sim.set_global_debug(true);
        let a = session(&mut sim);
        let b = session(&mut sim);
        let wireframes = DebugOptions {
            collider_wireframes: true,
        };
        sim.set_debug(a, wireframes).unwrap();
        sim.join(a, JoinRequest { debug: wireframes }).unwrap();
        let ea = sim.sessions().get(a).unwrap().entity.unwrap();
        assert!(sim.world().has::<DebugCollider>(sim.floor()));
        assert!(sim.world().has::<DebugCollider>(ea));

        sim.join(b, JoinRequest::default()).unwrap();
        let eb = sim.sessions().get(b).unwrap().entity.unwrap();
        assert!(sim.world().has::<DebugCollider>(sim.floor()));
        assert!(sim.world().has::<DebugCollider>(ea));
        assert!(!sim.world().has::<DebugCollider>(eb));
    }

    /// Enough rows to push a snapshot past the frame size limit.
    fn bloat_world(sim: &mut Simulation<RapierBackend>) {
        for i in 0..150_000u32 {
            let e = sim.world.spawn();
            sim.world.insert(
                e,
                Position {
                    x: -1.234_567_8e30,
                    y: 1.234_567_8e30 + i as f32,
                    z: -1.234_567_8e30,
                },
            );
            sim.world.insert(e, Color { value: u32::MAX - i });
        }
    }

    #[test]
    fn oversized_update_is_skipped_and_the_tick_goes_on() {
        let mut sim = sim();
        let viewer = session(&mut sim);
        sim.subscribe(viewer).unwrap();
        bloat_world(&mut sim);

        let mut outbox = Vec::new();
        let steps = sim.advance(Duration::from_millis(34), &mut outbox).unwrap();
        assert_eq!(steps, 1);
        assert_eq!(sim.tick(), 1);
        assert!(outbox.is_empty());
        assert!(sim.sessions().get(viewer).unwrap().intent.is_neutral());
    }

    #[test]
    fn unframeable_join_reply_undoes_the_join() {
        let mut sim = sim();
        let id = session(&mut sim);
        bloat_world(&mut sim);
        let before = sim.world().len();

        assert!(sim.join_frame(id, JoinRequest::default()).is_err());
        let record = sim.sessions().get(id).unwrap();
        assert_eq!(record.entity, None);
        assert!(!record.subscribed);
        assert_eq!(sim.world().len(), before);
        assert!(sim.world().with::<Player>().is_empty());
    }

    #[test]
    fn join_frame_carries_the_owner() {
        let mut sim = sim();
        let id = session(&mut sim);
        let frame = sim.join_frame(id, JoinRequest::default()).unwrap();
        let entity = sim.sessions().get(id).unwrap().entity.unwrap();
        match decode_payload(&frame[4..]).unwrap() {
            ServerMsg::Joined(snapshot) => assert_eq!(snapshot.owner(), Some(entity)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn disconnect_acts_like_leave() {
        let mut sim = sim();
        let id = session(&mut sim);
        sim.join(id, JoinRequest::default()).unwrap();
        let entity = sim.sessions().get(id).unwrap().entity.unwrap();
        sim.disconnect(id);
        assert!(!sim.world().is_alive(entity));
        assert!(sim.sessions().is_empty());
        assert_eq!(
            sim.subscribe(id),
            Err(SessionError::UnknownSession(id))
        );
    }

    #[test]
    fn player_lands_and_can_jump() {
        let mut sim = sim();
        let id = session(&mut sim);
        sim.join(id, JoinRequest::default()).unwrap();
        let entity = sim.sessions().get(id).unwrap().entity.unwrap();

        for _ in 0..120 {
            sim.step(&mut Vec::new()).unwrap();
        }
        assert!(sim.world().get::<Player>(entity).unwrap().can_jump);

        sim.input(
            id,
            InputIntent {
                jump: true,
                ..InputIntent::default()
            },
        )
        .unwrap();
        sim.step(&mut Vec::new()).unwrap();
        assert!(!sim.world().get::<Player>(entity).unwrap().can_jump);
    }

    #[test]
    fn reset_replaces_test_content() {
        let mut sim = sim();
        sim.reset_test_content();
        assert_eq!(sim.world().len(), 31);
        sim.build_test_wall(3);
        assert_eq!(sim.world().len(), 7);
        assert!(sim.world().is_alive(sim.floor()));
    }
}
