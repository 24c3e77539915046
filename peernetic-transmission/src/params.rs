//! Per-payload-type transmission policy.

use std::any::TypeId;
use std::collections::HashMap;
use std::time::Duration;

use peernetic_core::Payload;

use crate::TransmissionError;

/// How one payload type participates in the request/response protocol.
#[derive(Debug, Clone)]
pub enum MessageClass {
    /// The payload is a request: it is re-sent on this schedule and its
    /// state retained until `retain_for` elapses.
    Request {
        /// Monotonically increasing resend offsets, each relative to the
        /// previous send.
        resend_schedule: Vec<Duration>,
        /// How long request state (and duplicate suppression) lives.
        retain_for: Duration,
    },
    /// The payload is a response: sent once, its nonce remembered for
    /// `retain_for` so a second send of the same response is rejected.
    Response {
        /// How long the sent-response record lives.
        retain_for: Duration,
    },
}

impl MessageClass {
    /// A validated request class. The schedule must be monotonically
    /// increasing and `retain_for` must cover the whole schedule, so a
    /// request is never discarded while resends are still due.
    pub fn request(
        resend_schedule: Vec<Duration>,
        retain_for: Duration,
    ) -> Result<Self, TransmissionError> {
        if resend_schedule.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(TransmissionError::InvalidSchedule(
                "resend schedule must be monotonically increasing".to_string(),
            ));
        }
        let total: Duration = resend_schedule.iter().sum();
        if retain_for < total {
            return Err(TransmissionError::InvalidSchedule(format!(
                "retention {retain_for:?} shorter than schedule total {total:?}"
            )));
        }
        Ok(MessageClass::Request {
            resend_schedule,
            retain_for,
        })
    }

    /// A response class.
    pub fn response(retain_for: Duration) -> Self {
        MessageClass::Response { retain_for }
    }
}

/// Table mapping concrete payload types to their [`MessageClass`].
#[derive(Debug, Default)]
pub struct TypeMappings {
    classes: HashMap<TypeId, MessageClass>,
}

impl TypeMappings {
    /// An empty table.
    pub fn new() -> Self {
        TypeMappings { classes: HashMap::new() }
    }

    /// Declare how payloads of type `T` are handled.
    pub fn register<T: 'static>(&mut self, class: MessageClass) -> Result<(), TransmissionError> {
        if self
            .classes
            .insert(TypeId::of::<T>(), class)
            .is_some()
        {
            return Err(TransmissionError::DuplicateTypeMapping(
                std::any::type_name::<T>().to_string(),
            ));
        }
        Ok(())
    }

    /// Look up the class for a payload's concrete type.
    pub fn class_for(&self, payload: &Payload) -> Option<&MessageClass> {
        self.classes.get(&(**payload).type_id())
    }
}
