pub mod agent;
pub mod health;
pub mod metrics;
pub mod nodes;
pub mod operations;
pub mod system;
