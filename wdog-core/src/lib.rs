#![cfg_attr(not(test), no_std)]

pub mod button;
pub mod constants;
pub mod cv;
pub mod decode;
pub mod led;
pub mod pom;
pub mod receiver;
pub mod rsbus;
pub mod safety;
pub mod timer;
