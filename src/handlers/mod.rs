//! handlers/mod.rs
//! Módulo que agrupa los handlers HTTP (campañas y jobs).
pub mod campaign_handler;
pub mod job_handler;
