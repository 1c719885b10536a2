pub mod api;
pub mod db;
pub mod token;
pub mod ws;
