pub mod config;
pub mod db;
pub mod extraction;
pub mod records;
pub mod state;
pub mod storage;
