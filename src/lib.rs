//! Integration test package for the provider registry workspace.
//!
//! The tests live under `tests/`; shared fakes are in `tests/common`.
