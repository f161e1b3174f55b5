//! Time-ordered 64-bit identifiers.
//!
//! Layout, most significant bit first:
//!
//! ```text
//! | 42 bits: ms since EPOCH_MS | 10 bits: node | 12 bits: step |
//! ```
//!
//! Numeric order approximates creation order, which is what message history
//! and fan-out ordering rely on.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// 2024-01-01T00:00:00Z in Unix milliseconds.
pub const EPOCH_MS: u64 = 1_704_067_200_000;

const NODE_BITS: u32 = 10;
const STEP_BITS: u32 = 12;
const TIME_BITS: u32 = 42;

pub const MAX_NODE: u16 = (1 << NODE_BITS) - 1;
const MAX_STEP: u16 = (1 << STEP_BITS) - 1;
const MAX_TIME: u64 = (1 << TIME_BITS) - 1;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id(pub u64);

impl Id {
    pub fn from_parts(millis: u64, node: u16, step: u16) -> Self {
        Self(
            ((millis & MAX_TIME) << (NODE_BITS + STEP_BITS))
                | ((u64::from(node) & u64::from(MAX_NODE)) << STEP_BITS)
                | (u64::from(step) & u64::from(MAX_STEP)),
        )
    }

    /// Milliseconds since [`EPOCH_MS`].
    pub fn millis(&self) -> u64 {
        self.0 >> (NODE_BITS + STEP_BITS)
    }

    pub fn node(&self) -> u16 {
        ((self.0 >> STEP_BITS) & u64::from(MAX_NODE)) as u16
    }

    pub fn step(&self) -> u16 {
        (self.0 & u64::from(MAX_STEP)) as u16
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        let unix_ms = (EPOCH_MS + self.millis()) as i64;
        Utc.timestamp_millis_opt(unix_ms)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Bit-preserving conversion for SQLite `INTEGER` columns.
    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(value: i64) -> Self {
        Self(value as u64)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Id {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Id)
    }
}

/// Generator for one node. Safe to share between threads.
#[derive(Debug)]
pub struct IdGenerator {
    node: u16,
    state: Mutex<GeneratorState>,
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_millis: u64,
    step: u16,
}

impl IdGenerator {
    /// `node` is masked to 10 bits.
    pub fn new(node: u16) -> Self {
        Self {
            node: node & MAX_NODE,
            state: Mutex::new(GeneratorState::default()),
        }
    }

    pub fn node(&self) -> u16 {
        self.node
    }

    pub fn generate(&self) -> Id {
        let now = now_millis();
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // A clock that steps backwards, or a step counter that runs out within
        // one millisecond, both advance the logical clock instead of blocking.
        if now > state.last_millis {
            state.last_millis = now;
            state.step = 0;
        } else if state.step == MAX_STEP {
            state.last_millis += 1;
            state.step = 0;
        } else {
            state.step += 1;
        }

        Id::from_parts(state.last_millis, self.node, state.step)
    }
}

fn now_millis() -> u64 {
    let unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(EPOCH_MS);
    unix_ms.saturating_sub(EPOCH_MS)
}
