// marksync state managers
// Managers own per-session state: the local bookmark store, the change-feed
// subscriber and the session that ties them together.

pub mod bookmark_session;
pub mod bookmark_store;
pub mod change_feed_subscriber;
