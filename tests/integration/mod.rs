//! Integration tests for the stratum context hierarchy

mod config_integration;
mod confinement;
mod entity_actions;
mod hierarchy;
mod save_propagation;
mod store_integration;
mod test_utils;
