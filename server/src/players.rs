use log::info;
use shared::{InputAxes, Quat, Transform, Vec3, PLAYER_SPEED, POSITION_EPSILON};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: i32,
    pub transform: Transform,
    pub last_broadcast: Vec3,
    pub pending_input: InputAxes,
}

impl Player {
    pub fn new(id: i32, transform: Transform) -> Self {
        Self {
            id,
            transform,
            last_broadcast: transform.position,
            pending_input: InputAxes::default(),
        }
    }

    /// Moves one tick along the pending input and turns to face the motion.
    pub fn step(&mut self) {
        if let Some((dx, dz)) = self.pending_input.direction() {
            self.transform.position.x += dx * PLAYER_SPEED;
            self.transform.position.z += dz * PLAYER_SPEED;
            self.transform.rotation = Quat::facing(dx, dz);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlayerDirectory {
    players: BTreeMap<i32, Player>,
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a player at `transform`. Returns false if the id was already
    /// spawned, in which case it is moved there instead.
    pub fn spawn(&mut self, id: i32, transform: Transform) -> bool {
        if let Some(player) = self.players.get_mut(&id) {
            player.transform = transform;
            player.last_broadcast = transform.position;
            return false;
        }

        let p = transform.position;
        info!("Added player {} at ({:.2}, {:.2}, {:.2})", id, p.x, p.y, p.z);
        self.players.insert(id, Player::new(id, transform));
        true
    }

    pub fn remove(&mut self, id: i32) -> Option<Player> {
        let removed = self.players.remove(&id);
        if removed.is_some() {
            info!("Removed player {}", id);
        }
        removed
    }

    pub fn get(&self, id: i32) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.players.contains_key(&id)
    }

    pub fn set_input(&mut self, id: i32, input: InputAxes) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                player.pending_input = input;
                true
            }
            None => false,
        }
    }

    /// Overwrites a client-reported transform. Positions are not validated.
    pub fn set_transform(&mut self, id: i32, transform: Transform) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                player.transform = transform;
                true
            }
            None => false,
        }
    }

    pub fn step_all(&mut self) {
        for player in self.players.values_mut() {
            player.step();
        }
    }

    /// Players that moved past the broadcast threshold since the last call.
    ///
    /// Their broadcast baseline is reset to the current position.
    pub fn take_moved(&mut self) -> Vec<(i32, Transform)> {
        self.players
            .values_mut()
            .filter(|p| p.transform.position.distance(&p.last_broadcast) > POSITION_EPSILON)
            .map(|p| {
                p.last_broadcast = p.transform.position;
                (p.id, p.transform)
            })
            .collect()
    }

    /// Every player except `id`, with its current transform.
    pub fn others(&self, id: i32) -> Vec<(i32, Transform)> {
        self.players
            .values()
            .filter(|p| p.id != id)
            .map(|p| (p.id, p.transform))
            .collect()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }

    pub fn ids(&self) -> Vec<i32> {
        self.players.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
