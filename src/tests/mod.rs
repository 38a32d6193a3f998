//! tests/mod.rs
//! Pruebas de integración dentro del crate (base SQLite temporal).

mod common;
mod job_manager_tests;
