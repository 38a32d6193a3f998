//! services/mod.rs
//! Módulo que agrupa los servicios de la app: store, jobs, worker y entrega.

pub mod campaign_service;
pub mod campaign_worker;
pub mod delivery;
pub mod job_manager;
pub mod job_service;
pub mod pid_file;
pub mod process;
pub mod retry;
pub mod transaction_helper;
