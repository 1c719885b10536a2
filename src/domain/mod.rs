pub mod dispatch;
pub mod message;
pub mod models;
pub mod payload;
pub mod session_state;
pub mod working_time;
