//! StreamTweaks API - Helix REST client.
//!
//! Typed access to the parts of the Twitch Helix API the EventSub client
//! depends on: creating, deleting and listing EventSub subscriptions, and
//! resolving users. The `HelixApi` trait is the seam the subscription
//! manager and the service layer program against.

pub mod client;
pub mod response;
pub mod subscription;

// Re-export key types
pub use client::{HelixApi, HelixClient, HelixCredentials, RetryConfig};
pub use response::{HelixErrorBody, HelixResponse, HelixUser, Pagination, SubscriptionRecord};
pub use subscription::SubscriptionSpec;
