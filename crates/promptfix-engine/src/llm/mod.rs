pub mod backoff;
pub mod client;
pub mod parse;
pub mod prompts;

pub use backoff::{call_with_backoff, BackoffPolicy, FixedSchedule, NoDelay, DEFAULT_MAX_ATTEMPTS};
pub use client::{GatewayClient, UpstreamStatusError};
pub use parse::{parse_response, ParsedResponse};
pub use prompts::build_directive;
