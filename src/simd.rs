//! int16 to float conversion on the audio ingress.
//!
//! Samples keep their raw magnitude: the mel model was trained on
//! unnormalized int16 values, so there is no division by 32768 here.

/// Convert samples into `output`, resizing it to match.
pub fn convert_to_float(input: &[i16], output: &mut Vec<f32>) {
    output.clear();
    output.resize(input.len(), 0.0);
    convert_into(input, output);
}

/// Convert samples into a pre-sized slice.
pub fn convert_into(input: &[i16], output: &mut [f32]) {
    assert_eq!(input.len(), output.len());

    #[cfg(target_arch = "x86_64")]
    if std::arch::is_x86_feature_detected!("sse2") {
        // Safety: SSE2 presence checked above; slices have equal length.
        unsafe { convert_sse2(input, output) };
        return;
    }

    #[cfg(target_arch = "aarch64")]
    {
        // Safety: NEON is baseline on aarch64; slices have equal length.
        unsafe { convert_neon(input, output) };
        return;
    }

    #[allow(unreachable_code)]
    convert_scalar(input, output);
}

pub fn is_simd_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        return std::arch::is_x86_feature_detected!("sse2");
    }
    #[cfg(target_arch = "aarch64")]
    {
        return true;
    }
    #[allow(unreachable_code)]
    false
}

/// Correctness reference for the vectorized paths.
pub fn convert_scalar(input: &[i16], output: &mut [f32]) {
    for (dst, &src) in output.iter_mut().zip(input) {
        *dst = src as f32;
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn convert_sse2(input: &[i16], output: &mut [f32]) {
    use std::arch::x86_64::*;

    let simd_len = input.len() & !7;
    let mut i = 0;
    while i < simd_len {
        let v = _mm_loadu_si128(input.as_ptr().add(i) as *const __m128i);
        // Widen to i32 via a sign-extending shift, four lanes at a time.
        let lo = _mm_srai_epi32(_mm_unpacklo_epi16(v, v), 16);
        let hi = _mm_srai_epi32(_mm_unpackhi_epi16(v, v), 16);
        _mm_storeu_ps(output.as_mut_ptr().add(i), _mm_cvtepi32_ps(lo));
        _mm_storeu_ps(output.as_mut_ptr().add(i + 4), _mm_cvtepi32_ps(hi));
        i += 8;
    }
    convert_scalar(&input[simd_len..], &mut output[simd_len..]);
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn convert_neon(input: &[i16], output: &mut [f32]) {
    use std::arch::aarch64::*;

    let simd_len = input.len() & !7;
    let mut i = 0;
    while i < simd_len {
        let v = vld1q_s16(input.as_ptr().add(i));
        let lo = vmovl_s16(vget_low_s16(v));
        let hi = vmovl_s16(vget_high_s16(v));
        vst1q_f32(output.as_mut_ptr().add(i), vcvtq_f32_s32(lo));
        vst1q_f32(output.as_mut_ptr().add(i + 4), vcvtq_f32_s32(hi));
        i += 8;
    }
    convert_scalar(&input[simd_len..], &mut output[simd_len..]);
}
