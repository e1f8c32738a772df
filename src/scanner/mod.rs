//! Stateless SYN scanner: packet forge, raw packet I/O, sweep and reply
//! collection.
//!
//! One pre-built SYN template is patched per target (destination, random
//! seq/ack, checksum updated incrementally) and sent over a raw socket,
//! while a separate raw socket picks up SYN-ACKs on the scan's port pair.

pub mod checksum;
pub mod collector;
pub mod forge;
pub mod pacing;
#[cfg(target_os = "linux")]
pub mod raw_socket;
pub mod results;
pub mod syn_sender;
pub mod transport;

pub use collector::{classify_reply, ReplyClass, ReplyCollector};
pub use forge::PacketTemplate;
pub use pacing::{Pacing, PacingProfile};
#[cfg(target_os = "linux")]
pub use raw_socket::{RawSocketReceiver, RawSocketSender};
pub use results::{results_channel, ResultsReceiver, ResultsSink};
pub use syn_sender::{ScanError, SynSweeper};
pub use transport::{MockReceiver, MockSender, PacketRecv, PacketSend};
