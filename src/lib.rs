pub mod actuator;
pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod error;
pub mod fallback;
pub mod pool;
pub mod proto;
pub mod queue;
pub mod selector;
pub mod stream;
pub mod window;

pub use actuator::{spawn_actuator, Actuator, ActuatorCommand, ActuatorHandle, ActuatorReply, LoggingActuator};
pub use bootstrap::{Session, SessionResolver};
pub use codec::{ChatEvent, MessageKind};
pub use config::{ConfigError, PickerConfig};
pub use error::{PickerError, PickerResult};
pub use pool::CandidatePool;
pub use queue::{payload_queue, QueueMetrics, QueueReceiver, QueueSender, Received};
pub use selector::{CycleReport, QuestionSelector, Selection};
pub use stream::{StreamClient, StreamStats};
pub use window::{AdaptiveLadder, EventWindow};
