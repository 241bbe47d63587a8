pub mod client;

pub use client::CirconusApiClient;
