//! Fixed-rate simulation tick loop (§4.7 / C7): the single-writer owner of
//! the physics environment and policy collaborators.

mod collaborators;
mod handle;
mod slot;
mod tick;

pub use collaborators::{Env, Policy};
pub use handle::{channel, SimHandle, SimRequest, REQUEST_CHANNEL_DEPTH};
pub use slot::ActiveContextSlot;
pub use tick::{SimLoop, DEFAULT_TICK_HZ};
