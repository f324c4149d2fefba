pub mod name;
pub mod packet;
pub mod types;
