pub mod api;
pub mod device;
pub mod device_replay;
pub mod upload;
pub mod zk_protocol;
pub mod zk_tcp;
