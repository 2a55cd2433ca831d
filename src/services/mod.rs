// marksync services
// Services talk to the outside world or hold shared configuration:
// storage backends, change feeds, input validation, settings.

pub mod bookmark_draft;
pub mod change_feed;
pub mod realtime;
pub mod rest_storage;
pub mod settings_engine;
pub mod storage;
