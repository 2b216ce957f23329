//! Local-cache/remote-sync reconciliation.
//!
//! Mutations apply to the local cache first, observers are notified
//! through the change bus, and the remote write happens last; failures
//! land in the outbox for replay. Subscriptions serve cached data
//! instantly and hand over to the remote store once it answers.

mod bus;
mod collection;
mod outbox;

pub use bus::{ChangeBus, ListenerGuard};
pub use collection::{is_temp_id, CollectionSync, SubscribeOptions, SubscriptionHandle};
pub use outbox::{FlushReport, Outbox, PendingKind, PendingOp};

pub(crate) use collection::decode_documents;
