pub mod command;
pub mod file;
pub mod psam;
pub mod system;
