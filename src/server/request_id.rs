//! Request ids
//!
//! Each request gets a 63-bit id: 41 bits of milliseconds since 2024-01-01,
//! 10 bits of worker id, 12 bits of per-millisecond sequence. Ids are
//! time-ordered and unique across workers with distinct ids.

use std::sync::{Arc, Mutex, PoisonError};

use axum::http::{HeaderMap, HeaderValue, Request};
use chrono::Utc;
use tower_http::request_id::{MakeRequestId, RequestId};

/// Header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 2024-01-01T00:00:00Z in milliseconds
const EPOCH_MS: i64 = 1_704_067_200_000;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: u16 = (1 << SEQUENCE_BITS) - 1;
const WORKER_MASK: u16 = (1 << WORKER_BITS) - 1;

#[derive(Debug, Default)]
struct Clock {
    last_ms: i64,
    sequence: u16,
}

/// Snowflake id generator
#[derive(Debug)]
pub struct SnowflakeIds {
    worker_id: u16,
    clock: Mutex<Clock>,
}

impl SnowflakeIds {
    /// Worker ids above 1023 are masked to ten bits
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: worker_id & WORKER_MASK,
            clock: Mutex::new(Clock::default()),
        }
    }

    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_millis() - EPOCH_MS;
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);

        if now > clock.last_ms {
            clock.last_ms = now;
            clock.sequence = 0;
        } else {
            // Same millisecond or clock moved back: keep counting on the last one
            clock.sequence = (clock.sequence + 1) & SEQUENCE_MASK;
            if clock.sequence == 0 {
                clock.last_ms += 1;
            }
        }

        (clock.last_ms << (WORKER_BITS + SEQUENCE_BITS))
            | (i64::from(self.worker_id) << SEQUENCE_BITS)
            | i64::from(clock.sequence)
    }

    /// Split an id into (millis since epoch, worker, sequence)
    pub fn decompose(id: i64) -> (i64, u16, u16) {
        (
            id >> (WORKER_BITS + SEQUENCE_BITS),
            ((id >> SEQUENCE_BITS) as u16) & WORKER_MASK,
            (id as u16) & SEQUENCE_MASK,
        )
    }
}

/// `MakeRequestId` backed by a shared generator
#[derive(Debug, Clone)]
pub struct MakeSnowflakeId(Arc<SnowflakeIds>);

impl MakeSnowflakeId {
    pub fn new(ids: Arc<SnowflakeIds>) -> Self {
        Self(ids)
    }
}

impl MakeRequestId for MakeSnowflakeId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        Some(RequestId::new(HeaderValue::from(self.0.next_id())))
    }
}

/// Request id of the current request, 0 when absent or not numeric
pub fn current_id(headers: &HeaderMap) -> i64 {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
