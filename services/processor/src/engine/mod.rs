pub mod gateway;
pub mod pipeline;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;

pub use gateway::{GatewaySettings, ProviderGateway, ProviderOutcomes, ProviderStatus};
pub use pipeline::{DocumentPipeline, IngestError, PassReport, ProcessError};
pub use rate_limit::{CallLimiter, ProviderRateLimiter, Unlimited};
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, SchedulerSettings, TickReport};
