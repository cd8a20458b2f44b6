//! Core system components for cane operation
pub mod alert;
pub mod command;
pub mod device;
pub mod event;
pub mod frame;
pub mod health;
pub mod link;
pub mod range_filter;
pub mod scan;
pub mod sensing;
pub mod state;
pub mod telemetry;
pub mod transmit;
