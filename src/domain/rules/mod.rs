// Domain rules - Range clamping and effect chain policy

use crate::domain::errors::RangeError;
use crate::domain::model::*;

/// Clamps requested clip windows into the probed duration
pub struct RangeResolver;

impl RangeResolver {
    /// Resolve a requested window against the source duration.
    ///
    /// Clamping happens before the minimum-span check, so no negative or
    /// out-of-bounds span is ever constructed.
    pub fn resolve(
        requested_start_ms: i64,
        requested_end_ms: i64,
        duration_ms: u64,
        minimum_span_ms: Option<u64>,
    ) -> Result<ClipRange, RangeError> {
        let duration = i64::try_from(duration_ms).unwrap_or(i64::MAX);
        let safe_start = requested_start_ms.clamp(0, duration);
        let safe_end = requested_end_ms.max(safe_start).clamp(safe_start, duration);

        let range = ClipRange {
            start_ms: safe_start as u64,
            end_ms: safe_end as u64,
        };

        if let Some(minimum_ms) = minimum_span_ms {
            if range.span_ms() < minimum_ms {
                return Err(RangeError::TooShort {
                    start_ms: range.start_ms,
                    end_ms: range.end_ms,
                    minimum_ms,
                });
            }
        }

        Ok(range)
    }
}

/// Builds the ordered effect chain for a probed source
pub struct EffectChainBuilder;

impl EffectChainBuilder {
    /// Rotation (if any) first, then an aspect-preserving scale whose single
    /// bound lands on the short edge of the displayed frame.
    pub fn build(probe: &SourceProbe, target_height: u32) -> EffectChain {
        let final_height = Self::final_height(probe, target_height);
        let mut effects = Vec::with_capacity(2);

        let constrain_width = if probe.rotation != Rotation::None {
            effects.push(Effect::Rotate {
                degrees: probe.rotation.degrees(),
            });
            // Post-rotation frame orientation decides the constrained axis
            probe.is_portrait() != probe.rotation.swaps_axes()
        } else {
            // Portrait without rotation metadata: swap axes, do not rotate pixels
            probe.is_portrait()
        };

        let scale = if constrain_width {
            ScaleEffect::fit_width(final_height)
        } else {
            ScaleEffect::fit_height(final_height)
        };
        effects.push(Effect::Scale(scale));

        let audio = if probe.audio_supported {
            AudioPolicy::Keep
        } else {
            AudioPolicy::Drop
        };

        EffectChain { effects, audio }
    }

    /// Target bound capped by the source height and made even
    ///
    /// A known source height is never exceeded, so a 1-pixel source keeps
    /// its odd height of 1.
    pub fn final_height(probe: &SourceProbe, target_height: u32) -> u32 {
        if probe.height_known() {
            even_floor(target_height.min(probe.height)).min(probe.height)
        } else {
            even_floor(target_height)
        }
    }
}

/// Largest even value not above `value`, never below 2
pub fn even_floor(value: u32) -> u32 {
    (value - value % 2).max(2)
}
