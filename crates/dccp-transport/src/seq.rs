//! # 48-bit Circular Sequence Numbers
//!
//! DCCP sequence and acknowledgement numbers live in a 48-bit space that
//! wraps at 2^48. A number `a` is "less than" `b` when `b` lies ahead of `a`
//! by less than half the modulus (RFC 4340 §7.1).

/// Number of bits in an extended sequence number.
pub const SEQ_BITS: u32 = 48;

/// Size of the sequence space.
pub const SEQ_MODULUS: u64 = 1 << SEQ_BITS;

/// Largest representable sequence number.
pub const SEQ_MAX: u64 = SEQ_MODULUS - 1;

const HALF: u64 = SEQ_MODULUS / 2;

/// Reduce any u64 into the sequence space.
#[inline]
pub fn seq_mask(x: u64) -> u64 {
    x & SEQ_MAX
}

/// `a + b` modulo 2^48.
#[inline]
pub fn seq_add(a: u64, b: u64) -> u64 {
    seq_mask(a.wrapping_add(b))
}

/// `a - b` modulo 2^48.
#[inline]
pub fn seq_sub(a: u64, b: u64) -> u64 {
    seq_mask(a.wrapping_sub(b))
}

/// Forward distance from `from` to `to`.
#[inline]
pub fn seq_distance(from: u64, to: u64) -> u64 {
    seq_sub(to, from)
}

/// Circular `a < b`.
#[inline]
pub fn seq_lt(a: u64, b: u64) -> bool {
    let d = seq_sub(b, a);
    d != 0 && d < HALF
}

/// Circular `a <= b`.
#[inline]
pub fn seq_le(a: u64, b: u64) -> bool {
    a == b || seq_lt(a, b)
}

/// Circular maximum.
#[inline]
pub fn seq_max(a: u64, b: u64) -> u64 {
    if seq_lt(a, b) {
        b
    } else {
        a
    }
}

/// Circular minimum.
#[inline]
pub fn seq_min(a: u64, b: u64) -> u64 {
    if seq_lt(a, b) {
        a
    } else {
        b
    }
}

/// Whether `x` lies in the closed circular window `[lo, hi]`.
#[inline]
pub fn seq_in_window(x: u64, lo: u64, hi: u64) -> bool {
    seq_distance(lo, x) <= seq_distance(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sub_wrap() {
        assert_eq!(seq_add(SEQ_MAX, 1), 0);
        assert_eq!(seq_add(SEQ_MAX, 5), 4);
        assert_eq!(seq_sub(0, 1), SEQ_MAX);
        assert_eq!(seq_sub(10, 3), 7);
    }

    #[test]
    fn ordering_across_wrap() {
        assert!(seq_lt(SEQ_MAX - 2, 3), "3 follows 2^48-3 across the wrap");
        assert!(!seq_lt(3, SEQ_MAX - 2));
        assert!(seq_lt(1, 2));
        assert!(!seq_lt(2, 2));
        assert!(seq_le(2, 2));
        assert_eq!(seq_max(SEQ_MAX, 0), 0);
        assert_eq!(seq_min(SEQ_MAX, 0), SEQ_MAX);
    }

    #[test]
    fn window_membership() {
        assert!(seq_in_window(5, 1, 10));
        assert!(seq_in_window(1, 1, 10));
        assert!(seq_in_window(10, 1, 10));
        assert!(!seq_in_window(11, 1, 10));
        assert!(!seq_in_window(0, 1, 10));
        // Window straddling the wrap point
        assert!(seq_in_window(SEQ_MAX, SEQ_MAX - 3, 4));
        assert!(seq_in_window(2, SEQ_MAX - 3, 4));
        assert!(!seq_in_window(5, SEQ_MAX - 3, 4));
    }
}
