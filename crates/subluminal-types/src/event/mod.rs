mod envelope;
mod payload;

pub use envelope::Event;
pub use payload::{
    ArgsPreview, CallInfo, CallRef, CallStatus, ErrorClass, ErrorDetail, EventPayload,
    ResultPreview, RunStatus, RunSummary,
};
