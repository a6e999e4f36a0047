pub mod decoder;
pub mod engine;
pub mod proto;
pub mod supervisor;

pub use decoder::{BlockDecoder, DecodedBlock};
pub use engine::{SyncEngine, SyncState};
pub use supervisor::{ChannelOutcome, Supervisor};
