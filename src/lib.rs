pub mod api;
pub mod bus;
pub mod capture;
pub mod config;
pub mod error;
pub mod estimation;
pub mod publish;
pub mod sensor;
pub mod state;
