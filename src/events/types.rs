use std::fmt::Debug;
use std::fmt::Display;

use strum::AsRefStr;
use strum::Display as StrumDisplay;

/// The `type` of a `core/v1` Event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, AsRefStr)]
pub enum EventType {
    Normal,
    Warning,
}

/// Marker for enums usable as event reasons. Reasons are CamelCase, which is what a strum
/// `Display`/`AsRefStr` derive on the variant names gives.
pub trait Reason: Debug + Display + AsRef<str> + Clone + Send + Sync + 'static {}

#[derive(Debug)]
pub struct EventData<R: Reason> {
    pub type_: EventType,
    pub reason: R,
    pub message: String,
}

impl<R: Reason> EventData<R> {
    pub fn normal(reason: R, message: impl Into<String>) -> Self {
        Self::new(EventType::Normal, reason, message)
    }

    pub fn warning(reason: R, message: impl Into<String>) -> Self {
        Self::new(EventType::Warning, reason, message)
    }

    fn new(type_: EventType, reason: R, message: impl Into<String>) -> Self {
        Self {
            type_,
            reason,
            message: message.into(),
        }
    }
}
