//! Subsystems built on the coordination kernel.

pub mod agents;
pub mod checkpoint;
pub mod mail;
pub mod mandates;
pub mod patterns;
pub mod reservations;
pub mod tasks;

/// Schemas of every subsystem, in CLI order.
pub fn schemas() -> Vec<serde_json::Value> {
    vec![
        agents::schema(),
        mail::schema(),
        reservations::schema(),
        tasks::schema(),
        checkpoint::schema(),
        mandates::schema(),
        patterns::schema(),
    ]
}
