//! Types shared by the session server and the game client: the wire protocol
//! and the small amount of math both sides need to agree on.

pub mod protocol;

pub use protocol::{decode, encode, Message, MessageKind, MessageReader, ProtocolError};

use rand::Rng;

/// Distance a player covers per server tick at full input.
pub const PLAYER_SPEED: f32 = 0.15;
/// Minimum movement before a position is broadcast again.
pub const POSITION_EPSILON: f32 = 0.01;
/// Half-extent of the square area random spawns are placed in.
pub const SPAWN_EXTENT: f32 = 5.0;
/// Height random spawns are placed at.
pub const SPAWN_HEIGHT: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn lerp(&self, target: &Vec3, alpha: f32) -> Vec3 {
        Vec3 {
            x: self.x + (target.x - self.x) * alpha,
            y: self.y + (target.y - self.y) * alpha,
            z: self.z + (target.z - self.z) * alpha,
        }
    }
}

/// Orientation quaternion, stored in the same x, y, z, w order it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Rotation around the vertical axis that turns +z towards `(dir_x, dir_z)`.
    pub fn facing(dir_x: f32, dir_z: f32) -> Self {
        let half_yaw = dir_x.atan2(dir_z) / 2.0;
        Quat {
            x: 0.0,
            y: half_yaw.sin(),
            z: 0.0,
            w: half_yaw.cos(),
        }
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Planar movement input as sent by clients.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputAxes {
    pub x: f32,
    pub z: f32,
}

impl InputAxes {
    pub fn new(x: f32, z: f32) -> Self {
        Self { x, z }
    }

    pub fn is_idle(&self) -> bool {
        self.x == 0.0 && self.z == 0.0
    }

    /// Unit-length direction, or `None` for idle input.
    pub fn direction(&self) -> Option<(f32, f32)> {
        let magnitude = (self.x * self.x + self.z * self.z).sqrt();
        if magnitude > 0.0 {
            Some((self.x / magnitude, self.z / magnitude))
        } else {
            None
        }
    }
}

/// Random spawn point on the play area, resting on the ground.
pub fn random_spawn<R: Rng + ?Sized>(rng: &mut R) -> Transform {
    Transform::at(Vec3::new(
        rng.gen_range(-SPAWN_EXTENT..SPAWN_EXTENT),
        SPAWN_HEIGHT,
        rng.gen_range(-SPAWN_EXTENT..SPAWN_EXTENT),
    ))
}
