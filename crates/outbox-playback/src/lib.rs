//! Pool of expensive playback handles keyed by resource URL.
//!
//! Handles are reference counted: [`ResourcePool::acquire`] takes ownership,
//! [`ResourcePool::detach`] gives it up while keeping the handle warm, and
//! [`ResourcePool::release`] destroys the handle once no owner remains. When
//! the pool is full, the least-recently-accessed unowned entry is evicted.
//! A handle's playback offset is saved before destruction so the next acquire
//! of the same key resumes where it left off.
//!
//! ```ignore
//! let pool = ResourcePool::new(factory, PoolConfig::default());
//!
//! let player = pool.acquire("https://media.example.com/clip.mp4")?;
//! // ... switch views without tearing the player down
//! pool.detach("https://media.example.com/clip.mp4");
//! ```

mod error;
mod pool;
mod resume;

pub use error::{PoolError, Result};
pub use pool::{HandleFactory, PlaybackHandle, PoolConfig, ResourcePool};
pub use resume::{DEFAULT_RESUME_CAPACITY, DEFAULT_RESUME_TTL, ResumeCache};
