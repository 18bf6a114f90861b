pub mod channels;
pub mod health;
pub mod start;
pub mod status;
