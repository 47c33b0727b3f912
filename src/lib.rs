//! Per-tag reputation engine.
//!
//! Users vote each other up or down inside independent tags. A user's
//! reputation in a tag is recomputed on demand from the votes they received
//! (decayed by age, scaled by each voter's split influence) and the votes
//! they cast while the tag was bootstrapping, then cached in a versioned
//! document. `ReputationEngine::get_or_refresh_reputation` is the entry point.

pub mod aggregate;
pub mod config;
pub mod decay;
pub mod engine;
pub mod error;
pub mod gate;
pub mod keys;
pub mod records;
pub mod registry;
pub mod store;
pub mod store_mem;
pub mod types;
pub mod votes;
pub mod weight;

pub use config::EngineConfig;
pub use engine::{RecalcReport, ReputationEngine};
pub use error::EngineError;
pub use records::{Reputation, Tag, TagSettings, TimePeriod, User, Vote, VoteValue};
pub use store::{DocumentStore, KeyQuery};
pub use store_mem::MemoryStore;
pub use types::{Clock, ManualClock, SystemClock, TagKey, Timestamp, UserKey};
