pub mod date_range;
pub mod device_address;
pub mod models;
pub mod reconcile;
