//! Stable identifiers for the object arena (Design Notes: "cyclic reference graphs").
//!
//! Cross-object references (Train -> RailVehicle -> Decoder -> Interface,
//! Block <-> Zone) are modeled as IDs resolved through [`crate::world::World`]
//! rather than as `Rc`/`Arc` cycles. The owning edge is the arena entry
//! itself; every other reference is one of these newtypes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! object_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
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

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

object_id!(InterfaceId);
object_id!(DecoderId);
object_id!(VehicleId);
object_id!(TrainId);
object_id!(BlockId);
object_id!(ZoneId);
object_id!(InputId);
object_id!(OutputId);
object_id!(IdentificationId);
object_id!(ThrottleId);
