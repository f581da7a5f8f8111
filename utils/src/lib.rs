pub mod audio;
pub mod device;
