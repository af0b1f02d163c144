//! Broker seam - the transport the consumer and publisher talk through.
//!
//! The adapter never creates connections itself. It asks a
//! [`ChannelProvider`] for a channel bound to a [`Topology`] and drives that
//! channel through the narrow [`BrokerChannel`] interface.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Consumer / BrokerPublisher                      │
//! │  - poll() / ack() / nack()                                   │
//! │  - assert_exchange() / publish() / send_to_queue()           │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          ChannelProvider + BrokerChannel traits              │
//! │  open(topology) -> channel, close() on every exit path       │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                     │
//!          ▼                                     ▼
//! ┌─────────────────┐               ┌─────────────────────────┐
//! │ InMemoryBroker  │               │  AMQP client binding    │
//! │   (included)    │               │       (external)        │
//! └─────────────────┘               └─────────────────────────┘
//! ```

mod channel;
mod error;
#[cfg(feature = "in-memory")]
mod in_memory;

pub use channel::{BrokerChannel, ChannelProvider, Delivery, Topology};
pub use error::BrokerError;
#[cfg(feature = "in-memory")]
pub use in_memory::{InMemoryBroker, InMemoryChannel};
