//! Publishing with origin tagging.
//!
//! [`MessagePublisher`] is the seam consumers and use-cases publish through;
//! [`BrokerPublisher`] is the implementation that opens a channel per call,
//! stamps the reserved fields, publishes, and closes the channel again.

mod broker_publisher;
mod message;

pub use broker_publisher::BrokerPublisher;
pub use message::{MessagePublisher, PublishConfig, PublishError, SendMessage, Target};
