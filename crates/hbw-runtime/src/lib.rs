#![doc = "Heartbeat timeout detection between a producer thread and a watchdog thread."]

pub mod clock;
pub mod estop;
pub mod expiry;
pub mod heartbeat;
pub mod monitor;
pub mod producer;
pub mod realtime;
pub mod watchdog;

pub use clock::*;
pub use estop::*;
pub use expiry::*;
pub use heartbeat::*;
pub use monitor::*;
pub use producer::*;
pub use realtime::*;
pub use watchdog::*;
