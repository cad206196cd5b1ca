pub mod events;
pub mod plants;
pub mod storage;
