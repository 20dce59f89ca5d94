pub mod device;
pub mod external;
pub mod init;
