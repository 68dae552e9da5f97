pub mod crm;
pub mod evaluation;
pub mod job;
pub mod model;
pub mod session;
pub mod tier;
pub mod usage;
