pub mod engine;
pub mod states;

pub use engine::{BookingFlow, ConversationEngine, ConversationFlow, TransitionError};
pub use states::{
    ConversationAction, ConversationEvent, ConversationStep, TransitionContext, TransitionOutcome,
};
