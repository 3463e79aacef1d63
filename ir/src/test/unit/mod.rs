pub mod conversion;
pub mod print;
pub mod verify;
