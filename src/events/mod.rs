//! Event-in interface: how domain services reach connected clients.
//!
//! Everything funnels through [`EventPublisher`], which turns a
//! [`GatewayEvent`] into a `dispatch` frame and hands it to the hub. Events
//! arrive either over Redis pub/sub ([`RedisEventSubscriber`]) or the HTTP
//! publish endpoints in [`http`].

mod backoff;
pub mod http;
mod publisher;
mod redis;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use publisher::{EventPublisher, EventTarget, GatewayEvent};
pub use redis::RedisEventSubscriber;
