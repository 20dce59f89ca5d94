pub mod debug_messenger;
pub mod init;
pub mod instance;
