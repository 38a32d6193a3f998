//! Subsistema de ejecución de campañas en segundo plano: un Job Manager que
//! lanza un proceso worker por campaña y el bucle de envío de ese worker.

pub mod app;
pub mod config;
pub mod handlers;
pub mod logger;
pub mod models;
pub mod services;

#[cfg(test)]
mod tests;
