//! Configuration for the audio bridge.

use std::time::Duration;

use crate::BridgeError;

/// Configuration for a bridge session.
///
/// Use [`BridgeConfig::default()`] for sensible defaults, or customize as
/// needed. Validation happens at [`BridgeBuilder::start()`].
///
/// # Example
///
/// ```
/// use audio_bridge::BridgeConfig;
///
/// let config = BridgeConfig {
///     sample_rate: 44_100,
///     ..Default::default()
/// };
/// ```
///
/// [`BridgeBuilder::start()`]: crate::BridgeBuilder::start
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Capacity of the shared sample ring in frames.
    ///
    /// Sized to absorb worker scheduling jitter; at 48kHz the default holds
    /// ~85ms of audio. Default: 4096
    pub ring_buffer_length: usize,

    /// Number of frames the worker drains and forwards per wake cycle.
    ///
    /// Smaller values reduce latency but increase per-chunk overhead.
    /// Default: 512
    pub kernel_length: usize,

    /// Number of interleaved channels in the ring.
    ///
    /// Default: 1 (mono)
    pub channel_count: u16,

    /// Sample rate of the incoming audio, reported to the remote session.
    ///
    /// Take this from the audio context driving the render callback.
    /// Default: 48000
    pub sample_rate: u32,

    /// Bound on each startup handshake stage (worker ready, processor
    /// ready). Elapsing it transitions the bridge to `Errored`.
    ///
    /// Default: 5s
    pub handshake_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ring_buffer_length: 4096,
            kernel_length: 512,
            channel_count: 1,
            sample_rate: 48_000,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl BridgeConfig {
    /// Validates the configuration.
    pub(crate) fn validate(&self) -> Result<(), BridgeError> {
        if self.ring_buffer_length == 0 {
            return Err(BridgeError::InvalidConfig {
                reason: "ring_buffer_length must be non-zero".to_string(),
            });
        }
        if self.kernel_length == 0 {
            return Err(BridgeError::InvalidConfig {
                reason: "kernel_length must be non-zero".to_string(),
            });
        }
        if self.kernel_length > self.ring_buffer_length {
            return Err(BridgeError::InvalidConfig {
                reason: format!(
                    "kernel_length {} exceeds ring_buffer_length {}",
                    self.kernel_length, self.ring_buffer_length
                ),
            });
        }
        if self.channel_count == 0 {
            return Err(BridgeError::InvalidConfig {
                reason: "channel_count must be non-zero".to_string(),
            });
        }
        if self.sample_rate == 0 {
            return Err(BridgeError::InvalidConfig {
                reason: "sample_rate must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.ring_buffer_length, 4096);
        assert_eq!(config.kernel_length, 512);
        assert_eq!(config.channel_count, 1);
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_kernel_larger_than_ring() {
        let config = BridgeConfig {
            ring_buffer_length: 256,
            kernel_length: 512,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BridgeError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_sizes() {
        for config in [
            BridgeConfig {
                ring_buffer_length: 0,
                ..Default::default()
            },
            BridgeConfig {
                kernel_length: 0,
                ..Default::default()
            },
            BridgeConfig {
                channel_count: 0,
                ..Default::default()
            },
            BridgeConfig {
                sample_rate: 0,
                ..Default::default()
            },
        ] {
            assert!(config.validate().is_err());
        }
    }
}
