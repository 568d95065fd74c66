pub mod alert;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod hub;
pub mod live;
pub mod protocol;
pub mod websocket;

pub use dispatch::{Admission, CapacityError, DispatchScheduler, FrameJob, FrameProcessor, LiveOutcome};
pub use error::ServerError;
pub use http::{create_router, AppState};
pub use hub::{ViewerHub, ViewerId};
pub use protocol::{ClientMessage, Prediction, ServerMessage};
