//! # Ampwise - EV charging automation core
//!
//! Arbitrates between competing charging policies and drives a charger
//! through a rate-limited, sequenced command path.
//!
//! ## Features
//!
//! - **Arbitration**: priority-based mutual exclusion between policies, with
//!   a global override that keeps charging running
//! - **Safe sequencing**: current decreases always go off / set / on, and
//!   actuator operations are spaced by a minimum interval
//! - **Solar surplus**: tracks surplus power with hysteresis, ramp-down
//!   delays and grid-import protection
//! - **Night charging**: overnight sessions until the daily EV target, with
//!   the energy source picked from tomorrow's PV forecast
//! - **Balancing**: EV vs home battery priority from per-weekday targets
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `clock`: Time source and settle delays
//! - `host`: Host platform port (sensors, actuators, events, notifications)
//! - `amperage`: Current level arithmetic
//! - `astral`: Sunrise/sunset and night window predicates
//! - `sequencer`: The single path to the charger actuators
//! - `coordinator`: Priority arbitration between policies
//! - `balancer`: EV vs home battery priority verdict
//! - `policies`: Blocker, night charge, solar surplus and manual override
//! - `runtime`: Composition root and diagnostics

pub mod amperage;
pub mod astral;
pub mod balancer;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod logging;
pub mod policies;
pub mod runtime;
pub mod sequencer;

// Re-export commonly used types
pub use config::Config;
pub use error::{AmpwiseError, Result};
pub use runtime::ChargingAutomation;
