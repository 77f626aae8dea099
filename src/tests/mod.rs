//! Consolidated test modules.
//!
//! End-to-end scenarios that exercise the whole pipeline rather than one module.
