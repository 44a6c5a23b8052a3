//! Game simulation and room runtime modules

pub mod combat;
pub mod constants;
pub mod physics;
pub mod pickups;
pub mod registry;
pub mod room;
pub mod sim;
pub mod snapshot;
pub mod world;

pub use registry::RoomRegistry;
pub use room::{RoomCommand, RoomHandle};
