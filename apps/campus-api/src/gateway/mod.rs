pub mod core;
pub mod events;
pub mod handler;
pub mod presence;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

pub use self::core::{Gateway, GatewaySettings, GatewayStores};
