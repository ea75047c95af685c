pub mod scanner;
pub mod volumes;
