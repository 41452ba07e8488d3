#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(unused_variables)]

pub mod config;
pub mod convergence;
pub mod dataset;
pub mod design;
pub mod explore;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod sampler;
pub mod spec;
pub mod synthetic;
pub mod versioning;
