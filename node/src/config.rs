// Copyright (c) 2024 Botho Foundation

//! Node configuration, derived parameters, topic naming, and slot timing.

use crate::types::{Shard, Slot, VerticalIndex};
use displaydoc::Display;
use serde::{Deserialize, Serialize};
use std::{
    ops::Deref,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Bytes of input data carried per field point.
const BYTES_PER_POINT: u64 = das_coding::POINT_BYTES as u64;

/// Wire bytes per serialized field point.
const BYTES_PER_SERIALIZED_POINT: u64 = das_coding::SERIALIZED_POINT_BYTES as u64;

/// Node configuration. Immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Size of the locally random, quickly rotating vertical subnet set.
    pub fast_indices: u64,

    /// Size of the deterministic, publicly predictable vertical subnet set.
    pub slow_indices: u64,

    /// Samples per shard block after erasure extension.
    pub max_samples_per_shard_block: u64,

    /// Field points per sample.
    pub points_per_sample: u64,

    /// Maximum hold time for a fast subscription, in slots. Each fast entry
    /// rotates after between 1 and this many slots.
    pub slots_per_fast_rotation_max: u64,

    /// Deterministic hold period for slow subscriptions, in slots.
    pub slots_per_slow_rotation: u64,

    /// Stagger between consecutive slow-set indices, so they do not all
    /// rotate in the same slot.
    pub slot_offset_per_slow_index: u64,

    /// Number of shards.
    pub shard_count: u64,

    /// Seconds per slot.
    pub seconds_per_slot: u64,

    /// Number of active validators.
    pub validator_count: u64,

    /// Unix-seconds anchor all slot arithmetic is relative to.
    pub genesis_time: u64,

    /// Desired peer count on every subscribed vertical subnet.
    pub target_peers_per_das_sub: u64,

    /// Connection-manager low watermark.
    pub peer_count_lo: u64,

    /// Connection-manager high watermark.
    pub peer_count_hi: u64,

    /// Rounds of the swap-or-not shuffle.
    pub shuffle_round_count: u8,

    /// Fork digest, embedded in every topic name.
    pub fork_digest: [u8; 4],

    /// Open a UPnP mapping for the listener.
    pub enable_nat: bool,

    /// Run the transport unencrypted. Test networks only.
    pub disable_transport_security: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fast_indices: 16,
            slow_indices: 4,
            max_samples_per_shard_block: 16,
            points_per_sample: 16,
            slots_per_fast_rotation_max: 32,
            slots_per_slow_rotation: 2048,
            slot_offset_per_slow_index: 512,
            shard_count: 64,
            seconds_per_slot: 12,
            validator_count: 150_000,
            genesis_time: 0,
            target_peers_per_das_sub: 6,
            peer_count_lo: 120,
            peer_count_hi: 200,
            shuffle_round_count: 90,
            fork_digest: [0xaa, 0xbb, 0xcc, 0xdd],
            enable_nat: false,
            disable_transport_security: false,
        }
    }
}

/// Errors detected when expanding a [`Config`]. All are fatal at startup.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// fast_indices + slow_indices ({fast} + {slow}) exceeds the {subnets} sample subnets
    SubnetBudget {
        /// Configured fast set size.
        fast: u64,
        /// Configured slow set size.
        slow: u64,
        /// Derived sample subnet count.
        subnets: u64,
    },

    /// derived sample subnet count is zero
    NoSubnets,

    /// points_per_sample must be a non-zero power of two, got {0}
    BadPointsPerSample(u64),

    /// seconds_per_slot must be non-zero
    ZeroSlotDuration,

    /// slots_per_slow_rotation must be non-zero
    ZeroSlowRotation,

    /// slots_per_fast_rotation_max must be non-zero
    ZeroFastRotation,

    /// validator_count {vals} must be at least shard_count {shards}
    TooFewValidators {
        /// Configured validator count.
        vals: u64,
        /// Configured shard count.
        shards: u64,
    },
}

impl Config {
    /// Validate and compute the derived parameters.
    pub fn expand(&self) -> Result<ExpandedConfig, ConfigError> {
        let sample_subnets = self.max_samples_per_shard_block * self.shard_count;
        if sample_subnets == 0 {
            return Err(ConfigError::NoSubnets);
        }
        if self.fast_indices + self.slow_indices > sample_subnets {
            return Err(ConfigError::SubnetBudget {
                fast: self.fast_indices,
                slow: self.slow_indices,
                subnets: sample_subnets,
            });
        }
        if self.points_per_sample == 0 || !self.points_per_sample.is_power_of_two() {
            return Err(ConfigError::BadPointsPerSample(self.points_per_sample));
        }
        if self.seconds_per_slot == 0 {
            return Err(ConfigError::ZeroSlotDuration);
        }
        if self.slots_per_slow_rotation == 0 {
            return Err(ConfigError::ZeroSlowRotation);
        }
        if self.slots_per_fast_rotation_max == 0 {
            return Err(ConfigError::ZeroFastRotation);
        }
        if self.validator_count < self.shard_count {
            return Err(ConfigError::TooFewValidators {
                vals: self.validator_count,
                shards: self.shard_count,
            });
        }
        Ok(ExpandedConfig {
            config: self.clone(),
            sample_subnets,
            max_data_size: BYTES_PER_POINT * self.points_per_sample
                * self.max_samples_per_shard_block
                / 2,
        })
    }
}

/// A validated [`Config`] plus its derived parameters.
#[derive(Debug, Clone)]
pub struct ExpandedConfig {
    /// The configuration as given.
    pub config: Config,

    /// Total vertical subnet count:
    /// `max_samples_per_shard_block * shard_count`.
    pub sample_subnets: u64,

    /// Largest shard block body, in bytes, that still extends into
    /// `max_samples_per_shard_block` samples per shard.
    pub max_data_size: u64,
}

impl Deref for ExpandedConfig {
    type Target = Config;

    fn deref(&self) -> &Config {
        &self.config
    }
}

impl ExpandedConfig {
    /// The global shard-headers topic name.
    pub fn headers_topic(&self) -> String {
        format!("/eth2/{}/shard_headers/ssz", hex::encode(self.fork_digest))
    }

    /// The vertical (sample) subnet topic name for `subnet`.
    pub fn vert_topic(&self, subnet: VerticalIndex) -> String {
        format!(
            "/eth2/{}/das_vert_{}/ssz",
            hex::encode(self.fork_digest),
            subnet.0
        )
    }

    /// The horizontal (whole shard block) topic name for `shard`.
    pub fn horz_topic(&self, shard: Shard) -> String {
        format!(
            "/eth2/{}/das_horz_{}/ssz",
            hex::encode(self.fork_digest),
            shard.0
        )
    }

    /// Wire size of one sample chunk in bytes.
    pub fn chunk_bytes(&self) -> usize {
        (self.points_per_sample * BYTES_PER_SERIALIZED_POINT) as usize
    }

    /// Duration of one slot.
    pub fn slot_duration(&self) -> Duration {
        Duration::from_secs(self.seconds_per_slot)
    }

    /// The slot a tick at wall time `now` belongs to, for a ticker firing
    /// `tick_offset_secs` after every slot boundary. The flag is set when
    /// the time is before genesis, in which case the slot is the countdown
    /// distance instead.
    pub fn slot_with_offset(&self, now: SystemTime, tick_offset_secs: f64) -> (Slot, bool) {
        let unix = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let elapsed = unix - tick_offset_secs - self.genesis_time as f64;
        let slot = (elapsed / self.seconds_per_slot as f64).round();
        if slot < 0.0 {
            (Slot(-slot as u64), true)
        } else {
            (Slot(slot as u64), false)
        }
    }

    /// A ticker aligned to `genesis_time + offset` modulo the slot duration.
    ///
    /// Alignment is recomputed from the wall clock, not accumulated, so a
    /// paused process resumes on the correct boundary and skipped slots keep
    /// their numbers (late ticks are skipped, not bunched).
    pub fn ticker_with_offset(&self, offset: Duration) -> Interval {
        let period = self.slot_duration();
        let period_ns = period.as_nanos() as i128;
        let now_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i128)
            .unwrap_or(0);
        let anchor_ns = self.genesis_time as i128 * 1_000_000_000 + offset.as_nanos() as i128;
        let mut until_next = (anchor_ns - now_ns).rem_euclid(period_ns);
        if until_next == 0 {
            until_next = period_ns;
        }
        let mut ticker = interval_at(
            Instant::now() + Duration::from_nanos(until_next as u64),
            period,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_derives_parameters() {
        let expanded = Config::default().expand().unwrap();
        assert_eq!(expanded.sample_subnets, 16 * 64);
        // 31 bytes per point, 16 points per sample, 16 samples, halved for
        // the extension.
        assert_eq!(expanded.max_data_size, 31 * 16 * 16 / 2);
        assert_eq!(expanded.chunk_bytes(), 512);
    }

    #[test]
    fn test_subnet_budget_gate() {
        let config = Config {
            fast_indices: 10,
            slow_indices: 10,
            max_samples_per_shard_block: 15,
            shard_count: 1,
            ..Default::default()
        };
        assert_eq!(
            config.expand().unwrap_err(),
            ConfigError::SubnetBudget {
                fast: 10,
                slow: 10,
                subnets: 15
            }
        );
    }

    #[test]
    fn test_zero_subnets_gate() {
        let config = Config {
            max_samples_per_shard_block: 0,
            ..Default::default()
        };
        assert_eq!(config.expand().unwrap_err(), ConfigError::NoSubnets);
    }

    #[test]
    fn test_points_per_sample_gate() {
        let config = Config {
            points_per_sample: 12,
            ..Default::default()
        };
        assert_eq!(
            config.expand().unwrap_err(),
            ConfigError::BadPointsPerSample(12)
        );
    }

    #[test]
    fn test_topic_names_are_byte_exact() {
        let expanded = Config::default().expand().unwrap();
        assert_eq!(expanded.headers_topic(), "/eth2/aabbccdd/shard_headers/ssz");
        assert_eq!(
            expanded.vert_topic(VerticalIndex(0)),
            "/eth2/aabbccdd/das_vert_0/ssz"
        );
        assert_eq!(
            expanded.vert_topic(VerticalIndex(1023)),
            "/eth2/aabbccdd/das_vert_1023/ssz"
        );
        assert_eq!(expanded.horz_topic(Shard(7)), "/eth2/aabbccdd/das_horz_7/ssz");
    }

    #[test]
    fn test_slot_rounds_to_nearest() {
        let config = Config {
            genesis_time: 1_000_000,
            seconds_per_slot: 12,
            ..Default::default()
        };
        let expanded = config.expand().unwrap();
        let at = |secs: u64| UNIX_EPOCH + Duration::from_secs(secs);

        assert_eq!(expanded.slot_with_offset(at(1_000_000), 0.0), (Slot(0), false));
        assert_eq!(expanded.slot_with_offset(at(1_000_005), 0.0), (Slot(0), false));
        assert_eq!(expanded.slot_with_offset(at(1_000_007), 0.0), (Slot(1), false));
        assert_eq!(
            expanded.slot_with_offset(at(1_000_120), 0.0),
            (Slot(10), false)
        );
    }

    #[test]
    fn test_slot_before_genesis_counts_down() {
        let config = Config {
            genesis_time: 1_000_000,
            seconds_per_slot: 12,
            ..Default::default()
        };
        let expanded = config.expand().unwrap();
        let at = |secs: u64| UNIX_EPOCH + Duration::from_secs(secs);

        assert_eq!(expanded.slot_with_offset(at(999_880), 0.0), (Slot(10), true));
        assert_eq!(expanded.slot_with_offset(at(999_988), 0.0), (Slot(1), true));
    }

    #[test]
    fn test_work_tick_offset_recovers_slot() {
        let config = Config {
            genesis_time: 1_000_000,
            seconds_per_slot: 12,
            ..Default::default()
        };
        let expanded = config.expand().unwrap();
        // A work tick fires 8 seconds into slot 3; with the tick offset
        // subtracted it still resolves to slot 3.
        let tick = UNIX_EPOCH + Duration::from_secs(1_000_000 + 3 * 12 + 8);
        assert_eq!(expanded.slot_with_offset(tick, 8.0), (Slot(3), false));
    }
}
