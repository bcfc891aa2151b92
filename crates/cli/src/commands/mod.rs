pub mod ask;
pub mod chat;
pub mod doctor;
pub mod init;
pub mod memory;
pub mod serve;
