//! Subscription sequencing: publisher-side recording/dispatch and
//! subscriber-side sequencing/delivery.

mod publisher;
mod subscriber;

pub use publisher::{
    DispatchOutcome, MutationOutcome, ResumeOutcome, SubscriptionEngine, SubscriptionEngineConfig,
    SubscriptionRequest,
};
pub use subscriber::{
    CallbackHooks, CallbackProcessor, CallbackProcessorConfig, ProcessOutcome, SubscriptionHealth,
    SubscriptionStats,
};
