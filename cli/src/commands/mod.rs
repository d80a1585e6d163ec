pub mod hello;
pub mod pin;
pub mod shape;
