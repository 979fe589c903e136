#![allow(dead_code)]

pub mod fixtures;
pub mod memory;

mod scenarios;
mod properties;
