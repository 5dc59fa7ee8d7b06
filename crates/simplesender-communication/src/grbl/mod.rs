//! GRBL 1.1h firmware protocol.

pub mod controller;
pub mod overrides;
pub mod response;
pub mod status;
pub mod stream;
