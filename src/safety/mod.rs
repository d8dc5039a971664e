//! Safety layer: secret redaction.
//!
//! Everything that leaves the analysis client as a log line or as overlay
//! error text passes through redaction first.

pub mod redact;
