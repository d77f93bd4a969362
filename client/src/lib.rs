mod client;
mod connector;

pub use client::{Client, Drained};
