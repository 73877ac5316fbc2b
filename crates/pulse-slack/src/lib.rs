pub mod api;
pub mod delivery;
pub mod fetcher;
pub mod resolver;
#[cfg(any(test, feature = "scripted"))]
pub mod scripted;

pub use api::SlackApi;
pub use delivery::DeliveryTarget;
pub use fetcher::{ChannelHistory, FetchOptions, MessageFetcher};
pub use resolver::{ChannelDirectory, SlackNameResolver, TargetChannels};
