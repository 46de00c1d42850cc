//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Invocation attempt failed (retryable):
//!     → backoff.rs (delay before the next attempt)
//!     → FailoverInvoker caps it at the remaining retry budget
//! ```
//!
//! # Design Decisions
//! - Jitter spreads retries of concurrent requests
//! - A zero base delay retries immediately

pub mod backoff;
