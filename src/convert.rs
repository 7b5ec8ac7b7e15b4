//! Float to PCM16 sample conversion.

/// Converts one f32 sample to i16.
///
/// Input should be in the range [-1.0, 1.0]. Values outside this range are
/// clamped, so the mapping is monotonic over the whole f32 domain.
///
/// Uses × 32767 (not 32768) for symmetric scaling: -1.0 maps to -32767
/// rather than -32768, losing 1 LSB at the negative extreme. This is a
/// common convention that avoids producing out-of-range values.
///
/// Non-finite input (NaN, infinities from malformed upstream data) is
/// rendered as silence rather than entering the ring; callers that need to
/// count occurrences should screen with [`f32::is_finite`] first.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Converts a quantum of f32 samples into a reusable i16 scratch buffer.
///
/// The scratch buffer is cleared and refilled; it grows to the quantum size
/// on first use and never shrinks, so steady-state calls do not allocate.
/// Iterates forward over the full input range.
///
/// Returns the number of non-finite samples that were rendered as silence.
pub fn convert_quantum(input: &[f32], scratch: &mut Vec<i16>) -> usize {
    scratch.clear();
    scratch.reserve(input.len());

    let mut non_finite = 0usize;
    for &sample in input {
        if !sample.is_finite() {
            non_finite += 1;
        }
        scratch.push(f32_to_i16(sample));
    }
    non_finite
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_range() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32767);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_clamps_out_of_range() {
        // Out-of-range inputs map to the same boundary as the in-range extremes
        assert_eq!(f32_to_i16(1.5), f32_to_i16(1.0));
        assert_eq!(f32_to_i16(-1.5), f32_to_i16(-1.0));
        assert_eq!(f32_to_i16(100.0), 32767);
        assert_eq!(f32_to_i16(-100.0), -32767);
    }

    #[test]
    fn test_monotonic() {
        let mut previous = i16::MIN;
        let mut x = -1.0f32;
        while x <= 1.0 {
            let converted = f32_to_i16(x);
            assert!(converted >= previous, "non-monotonic at {x}");
            previous = converted;
            x += 1.0 / 4096.0;
        }
    }

    #[test]
    fn test_idempotent_on_integral_inputs() {
        // Converting a value that is already an exact i16/32767 grid point
        // reproduces that point.
        for &v in &[0i16, 1, -1, 1000, -1000, 32767, -32767] {
            let as_float = f32::from(v) / 32767.0;
            assert_eq!(f32_to_i16(as_float), v);
        }
    }

    #[test]
    fn test_non_finite_is_silence() {
        assert_eq!(f32_to_i16(f32::NAN), 0);
        assert_eq!(f32_to_i16(f32::INFINITY), 0);
        assert_eq!(f32_to_i16(f32::NEG_INFINITY), 0);
    }

    #[test]
    fn test_convert_quantum() {
        let mut scratch = Vec::new();
        let bad = convert_quantum(&[0.0, 0.5, -0.5, 1.0], &mut scratch);
        assert_eq!(bad, 0);
        assert_eq!(scratch, vec![0, 16383, -16383, 32767]);
    }

    #[test]
    fn test_convert_quantum_counts_non_finite() {
        let mut scratch = Vec::new();
        let bad = convert_quantum(&[0.25, f32::NAN, f32::INFINITY], &mut scratch);
        assert_eq!(bad, 2);
        assert_eq!(scratch[1], 0);
        assert_eq!(scratch[2], 0);
    }

    #[test]
    fn test_convert_quantum_reuses_scratch() {
        let mut scratch = Vec::with_capacity(128);
        convert_quantum(&[0.1; 128], &mut scratch);
        let cap = scratch.capacity();
        convert_quantum(&[0.2; 128], &mut scratch);
        assert_eq!(scratch.capacity(), cap);
        assert_eq!(scratch.len(), 128);
    }
}
