//! # deskunit-node
//!
//! Runtime for one faculty desk unit: the control loop that owns the
//! [`deskunit_core::DeskUnit`], and a local HTTP gateway through which the
//! message bus bridge and operators reach it.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod gateway;
pub mod logging;
pub mod runner;
pub mod state;
