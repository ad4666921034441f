use log::{debug, info};
use shared::{Message, MessageKind, Transform};
use std::collections::BTreeMap;

/// Share of the remaining distance covered per interpolation frame.
pub const INTERPOLATION_ALPHA: f32 = 0.5;

/// A player as seen by this client: where it is drawn and where the server says it is.
#[derive(Debug, Clone, PartialEq)]
pub struct MirroredPlayer {
    pub id: i32,
    pub current: Transform,
    pub target: Transform,
}

impl MirroredPlayer {
    pub fn new(id: i32, transform: Transform) -> Self {
        Self {
            id,
            current: transform,
            target: transform,
        }
    }

    /// Moves halfway towards the target position and snaps to the target rotation.
    pub fn interpolate(&mut self) {
        self.current.position = self
            .current
            .position
            .lerp(&self.target.position, INTERPOLATION_ALPHA);
        self.current.rotation = self.target.rotation;
    }
}

/// Client-side copy of the match, fed by server messages.
#[derive(Debug, Clone)]
pub struct WorldMirror {
    local: MirroredPlayer,
    remotes: BTreeMap<i32, MirroredPlayer>,
}

impl WorldMirror {
    pub fn new(local_spawn: Transform) -> Self {
        Self {
            local: MirroredPlayer::new(0, local_spawn),
            remotes: BTreeMap::new(),
        }
    }

    /// Applies one batch of server messages, then interpolates every player once.
    ///
    /// Returns the ids of remote players whose target changed.
    pub fn apply_batch(&mut self, messages: &[Message]) -> Vec<i32> {
        let mut just_left = Vec::new();
        let mut moved = Vec::new();

        for msg in messages {
            match msg.kind {
                MessageKind::PositionOwn => {
                    self.local.target = msg.transform();
                }
                MessageKind::Spawn => {
                    if !self.remotes.contains_key(&msg.player_id) {
                        info!("Player {} spawned", msg.player_id);
                        self.remotes
                            .insert(msg.player_id, MirroredPlayer::new(msg.player_id, msg.transform()));
                    }
                }
                // A late Position must not resurrect a player that just left
                MessageKind::Position if !just_left.contains(&msg.player_id) => {
                    let transform = msg.transform();
                    self.remotes
                        .entry(msg.player_id)
                        .or_insert_with(|| {
                            debug!("Creating player {} from a position update", msg.player_id);
                            MirroredPlayer::new(msg.player_id, transform)
                        })
                        .target = transform;
                    moved.push(msg.player_id);
                }
                MessageKind::PlayerLeft => {
                    if self.remotes.remove(&msg.player_id).is_some() {
                        info!("Player {} left", msg.player_id);
                        just_left.push(msg.player_id);
                    }
                }
                _ => {}
            }
        }

        self.interpolate();
        moved
    }

    pub fn interpolate(&mut self) {
        for player in self.remotes.values_mut() {
            player.interpolate();
        }
        self.local.interpolate();
    }

    pub fn local(&self) -> &MirroredPlayer {
        &self.local
    }

    pub fn remote(&self, id: i32) -> Option<&MirroredPlayer> {
        self.remotes.get(&id)
    }

    pub fn remote_ids(&self) -> Vec<i32> {
        self.remotes.keys().copied().collect()
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }
}
