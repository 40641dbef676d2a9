use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Width of a spatial cell (chunk) along X and Z, in world units.
pub const CELL_SIZE: f32 = 16.0;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Short form is enough to tell ids apart in logs.
                write!(f, "{:.8}", self.0.to_string())
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for a live entity.
    EntityId
}

uuid_id! {
    /// Opaque identifier of a world instance.
    InstanceId
}

uuid_id! {
    /// Identity of a connected session, assigned at handshake.
    SessionId
}

/// A cell coordinate in the XZ plane (the Y axis is not partitioned).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The cell containing a world position.
    pub fn from_position(pos: Vec3) -> Self {
        Self {
            x: (pos.x / CELL_SIZE).floor() as i32,
            z: (pos.z / CELL_SIZE).floor() as i32,
        }
    }

    /// World-space position of the cell's minimum corner.
    pub fn origin(&self) -> Vec3 {
        Vec3::new(self.x as f32 * CELL_SIZE, 0.0, self.z as f32 * CELL_SIZE)
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(EntityId::new(), EntityId::new());
        assert_ne!(InstanceId::new(), InstanceId::new());
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn display_is_short() {
        let id = EntityId::new();
        assert_eq!(id.to_string().len(), 8);
    }

    #[test]
    fn position_to_cell() {
        assert_eq!(
            CellCoord::from_position(Vec3::new(10.0, 64.0, 10.0)),
            CellCoord::new(0, 0)
        );
        assert_eq!(
            CellCoord::from_position(Vec3::new(20.0, 0.0, -5.0)),
            CellCoord::new(1, -1)
        );
        assert_eq!(
            CellCoord::from_position(Vec3::new(-16.0, 0.0, -16.1)),
            CellCoord::new(-1, -2)
        );
    }

    #[test]
    fn origin_round_trips_through_from_position() {
        let coord = CellCoord::new(-3, 7);
        assert_eq!(CellCoord::from_position(coord.origin()), coord);
    }
}
