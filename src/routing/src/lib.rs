pub mod address;
pub mod destination;
pub mod error;
pub mod plugin;
pub mod protocol;
pub mod routing_service;

pub use address::{TCPAddress, Uri};
pub use destination::RouteDestination;
pub use error::{Error, Result};
pub use plugin::RoutingPlugin;
pub use routing_service::{MySQLRouting, Protocol};
