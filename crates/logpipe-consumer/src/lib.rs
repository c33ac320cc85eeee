//! Resilient broker consumer for logpipe
//!
//! [`ResilientConsumer`] keeps a broker subscription alive across connection
//! loss and feeds every delivery through decoding into the batch writer.
//! Brokers plug in through the [`Broker`] trait: [`AmqpBroker`] talks to
//! RabbitMQ, [`MemoryBroker`] is an in-process queue for tests.

mod amqp;
mod broker;
mod consumer;
mod memory;

pub use amqp::AmqpBroker;
pub use broker::{
    Acknowledger, Broker, BrokerError, Delivery, SessionCloser, SubscribeOptions, Subscription,
};
pub use consumer::{ConsumerError, ConsumerOptions, ResilientConsumer};
pub use memory::MemoryBroker;
