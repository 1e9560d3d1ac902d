pub mod allowlist;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod decision;
pub mod error;
pub mod handlers;
pub mod health;
pub mod identity;
pub mod middleware;
pub mod policy;
pub mod policy_router;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod store;
pub mod throttler;
pub mod window;

pub use config::Config;
pub use decision::{Decision, Quota};
pub use error::{GuardError, Result};
pub use identity::{Identity, IdentityResolver, RequestMeta};
pub use policy::{Policies, Policy, ThrottlePolicy};
pub use policy_router::{Evaluation, PolicyRouter};
pub use server::create_app;
