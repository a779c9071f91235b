//! Atomic session status and counters.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No connection attempt has been made yet
    Idle,
    /// A live channel exists; sends succeed
    Open,
    /// No live channel; sends are dropped, not queued
    Closed,
}

const IDLE: u8 = 0;
const OPEN: u8 = 1;
const CLOSED: u8 = 2;

/// Lock-free status cell, readable from any thread without blocking.
pub struct AtomicSessionStatus(AtomicU8);

impl AtomicSessionStatus {
    pub fn new(status: SessionStatus) -> Self {
        Self(AtomicU8::new(Self::encode(status)))
    }

    #[inline]
    pub fn get(&self) -> SessionStatus {
        match self.0.load(Ordering::Acquire) {
            IDLE => SessionStatus::Idle,
            OPEN => SessionStatus::Open,
            _ => SessionStatus::Closed,
        }
    }

    #[inline]
    pub fn set(&self, status: SessionStatus) {
        self.0.store(Self::encode(status), Ordering::Release);
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire) == OPEN
    }

    fn encode(status: SessionStatus) -> u8 {
        match status {
            SessionStatus::Idle => IDLE,
            SessionStatus::Open => OPEN,
            SessionStatus::Closed => CLOSED,
        }
    }
}

/// Atomic delivery counters kept by a session.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    posted: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub posted: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub reconnects: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment_posted(&self) {
        self.posted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_delivered(&self, count: u64) {
        self.delivered.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            posted: self.posted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
