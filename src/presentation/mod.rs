pub mod export;
pub mod views;
