#![deny(warnings)]

pub mod aggregate;
pub mod config;
pub mod decode;
pub mod emotion;
pub mod features;
pub mod pipeline;
pub mod report;
pub mod segment;
pub mod synth;
pub mod util;
