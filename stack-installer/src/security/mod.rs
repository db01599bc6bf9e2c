pub mod crypto;
pub mod secrets;
