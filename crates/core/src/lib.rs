pub mod config;
pub mod domain;
pub mod errors;

pub use chrono;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use domain::evaluation::{EvaluatorKind, EvaluatorResult};
pub use domain::job::{AppliedJob, ApplicationStatus, JobListing};
pub use domain::model::{ModelNode, ModelSelection};
pub use domain::session::{Conversation, Message, Role, TurnScope};
pub use domain::tier::ModelTier;
pub use domain::usage::TokenUsage;
pub use errors::{ApplicationError, DomainError, InterfaceError};
