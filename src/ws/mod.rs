pub mod codec;
pub mod connctx;
pub mod maintenance;
pub mod presence;
pub mod reaper;
pub mod registry;
pub mod room;
pub mod sync;

pub use connctx::{AuthoredIds, Connection, ConnectionId, ConnectionState, Outbound};
pub use registry::{RegistryStats, RoomRegistry};
pub use room::Room;
