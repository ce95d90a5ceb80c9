#[macro_use]
extern crate tracing;

mod connection;
mod participant;
mod source;
mod youtube;

pub use connection::{
    ConnectionManager,
    Liveness,
};
pub use participant::{
    Participant,
    ParticipantRegistry,
};
pub use source::{
    ChatHandle,
    ChatSource,
    RawMessage,
};
pub use youtube::YouTubeSource;
