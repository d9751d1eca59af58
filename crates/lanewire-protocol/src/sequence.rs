//! Wrapping comparisons over the 16-bit sequence space.

use lanewire_core::constants::HALF_SEQUENCE_SPACE;

use crate::packet::SequenceNumber;

/// Compares sequence numbers with wrapping arithmetic.
pub fn sequence_greater_than(s1: SequenceNumber, s2: SequenceNumber) -> bool {
    ((s1 > s2) && (s1 - s2 <= HALF_SEQUENCE_SPACE)) || ((s1 < s2) && (s2 - s1 > HALF_SEQUENCE_SPACE))
}

/// Compares sequence numbers with wrapping arithmetic.
pub fn sequence_less_than(s1: SequenceNumber, s2: SequenceNumber) -> bool {
    sequence_greater_than(s2, s1)
}

/// Signed distance from `base` to `seq`, resolved modulo the sequence space.
///
/// Positive when `seq` is newer than `base`.
pub fn sequence_diff(seq: SequenceNumber, base: SequenceNumber) -> i32 {
    i32::from(seq.wrapping_sub(base) as i16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ordering() {
        assert!(sequence_greater_than(2, 1));
        assert!(sequence_less_than(1, 2));
        assert!(!sequence_greater_than(1, 1));
    }

    #[test]
    fn test_wraparound_ordering() {
        // 3 comes after 65533 once the counter wrapped
        assert!(sequence_greater_than(3, 65533));
        assert!(sequence_less_than(65533, 3));
    }

    #[test]
    fn test_diff_is_signed() {
        assert_eq!(sequence_diff(10, 5), 5);
        assert_eq!(sequence_diff(5, 10), -5);
        assert_eq!(sequence_diff(2, 65534), 4);
        assert_eq!(sequence_diff(65534, 2), -4);
    }
}
