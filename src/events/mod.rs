//! Event publication: in-process broadcast for lifecycle listeners and a
//! NATS writer for the CD success topic.

pub mod cd_event;
pub mod nats;
pub mod publisher;

pub use cd_event::{DeploymentEvent, PipelineMaterialCommit};
pub use nats::{EventWriter, NatsEventWriter};
pub use publisher::{EventPublisher, LifecycleEvent};
