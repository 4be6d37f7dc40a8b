//! facereg-engine — sequences validation, detection, extraction, search and
//! persistence for registration and recognition requests.

pub mod config;
pub mod engine;
pub mod validate;

pub use config::Config;
pub use engine::{
    spawn_engine, EngineError, EngineHandle, EngineOptions, RegisterOutcome, RegistrationRequest,
};
pub use validate::{validate_registration, ValidationError};
