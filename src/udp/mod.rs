//! UDP ASSOCIATE support
//!
//! The datagram codec and the relay that multiplexes client flows over one
//! ephemeral server socket.

mod packet;
mod relay;

pub use packet::Datagram;
pub(crate) use relay::handle_associate;
