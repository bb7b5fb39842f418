//! Use cases: provisioning servers, reconciling processor webhooks and
//! distributing the resulting status changes to live subscribers.

pub mod fanout;
pub mod provisioning;
pub mod reconciler;
pub mod signature;
