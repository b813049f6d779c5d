#![no_std]

pub mod feedback;
