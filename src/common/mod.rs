//! C1 — common types & error taxonomy shared across every component: address
//! types, port identifiers, the error/result type, the simulated clock, and
//! the `Tickable` contract consumed by the hardware-simulation tick (C4).

pub mod address;
pub mod clock;
pub mod error;
pub mod port_id;

pub use address::*;
pub use clock::{new_shared_clock, SharedClock, SimClock, Tickable, TickTimer};
pub use error::{SimError, SimResult};
pub use port_id::PortId;
