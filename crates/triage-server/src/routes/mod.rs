pub mod graphs;
pub mod health;
pub mod incidents;
pub mod webhook;
