pub mod assignment;
pub mod event;
pub mod location;
pub mod order;
pub mod principal;
pub mod rider;
pub mod tracking;
