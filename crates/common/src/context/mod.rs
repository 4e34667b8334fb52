//! Context Engine
//!
//! Turns one question into the grounded context the generator sees:
//! - Query classification into structured analytics vs. semantic-only
//! - Guaranteed forecast and prediction context
//! - Audience resolution
//! - Concurrent assembly and prompt construction

pub mod assembler;
pub mod audience;
pub mod guaranteed;
pub mod prompt;
pub mod query_classifier;

pub use assembler::{ContextAssembler, ContextPayload, ContextQuery};
pub use audience::{resolve_audience, AudienceType};
pub use prompt::build_system_prompt;
pub use query_classifier::{classify, QueryCategory};
