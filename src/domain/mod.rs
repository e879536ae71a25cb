// ============================================================
// Layer 3 - Domain Layer
// ============================================================
// Plain Rust structs, enums and traits describing what the
// system works with. No Burn types, no file I/O.
//
//   sample.rs  - one labelled (features, label, domain) example
//   monitor.rs - best-metric tracking and early stopping
//   traits.rs  - abstractions other layers implement

// A labelled example tagged with its domain
pub mod sample;

// Best-metric tracking and early stopping
pub mod monitor;

// Core abstractions (traits) that other layers implement
pub mod traits;
