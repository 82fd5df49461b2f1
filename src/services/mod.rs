pub mod activity;
pub mod ai;
pub mod batch;
pub mod history;
pub mod import;
pub mod jobs;
pub mod lifecycle;
pub mod mailbox;
pub mod notify;
pub mod router;
