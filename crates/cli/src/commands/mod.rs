pub mod ask;
pub mod gateway;
pub mod onboard;
