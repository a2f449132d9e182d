pub mod assert;
pub mod num;
pub mod print;
