//! Microsoft Correlation Vector (MS-CV) v2
//!
//! A correlation vector is a random 16-character base plus a dotted sequence
//! counter, rendered as `base.counter` and attached to every outgoing
//! request as the `MS-CV` header. The rendered value never exceeds 63
//! characters; `increment` and `extend` silently refuse rather than break
//! that bound.

use uuid::Uuid;

/// Alphabet the base is drawn from (standard base64 characters)
const CV_BASE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Length of the random base segment
const CV_BASE_LENGTH: usize = 16;

/// Maximum rendered length of a correlation vector
const CV_MAX_LENGTH: usize = 63;

/// A mutable correlation vector
///
/// Not internally synchronized; the process-wide instance lives behind the
/// application context's mutex so that `value` + `increment` pairs stay
/// atomic and the header sequence observed by the server is strictly
/// monotonic.
#[derive(Debug, Clone)]
pub struct CorrelationVector {
    base: String,
    counter: i32,
}

impl CorrelationVector {
    /// Create a new vector with a random base and the counter at 1
    pub fn new() -> Self {
        Self {
            base: random_base(),
            counter: 1,
        }
    }

    /// Render the current value as `base.counter`
    pub fn value(&self) -> String {
        format!("{}.{}", self.base, self.counter)
    }

    /// Advance the sequence counter and return the new rendered value
    ///
    /// Leaves the counter unchanged if the incremented rendering would
    /// exceed 63 characters or the counter would overflow `i32`.
    pub fn increment(&mut self) -> String {
        if let Some(next) = self.counter.checked_add(1) {
            if self.base.len() + 1 + decimal_digits(next) <= CV_MAX_LENGTH {
                self.counter = next;
            }
        }
        self.value()
    }

    /// Append a new dot segment, making the current value the new base
    ///
    /// The counter restarts at 1. Refused (value unchanged) unless the
    /// extended `current.1` rendering still fits in 63 characters.
    pub fn extend(&mut self) -> String {
        let current = self.value();
        if current.len() + 2 <= CV_MAX_LENGTH {
            self.base = current;
            self.counter = 1;
        }
        self.value()
    }
}

impl Default for CorrelationVector {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate the 16-character random base from fresh UUID bytes
fn random_base() -> String {
    let bytes = Uuid::new_v4();
    let bytes = bytes.as_bytes();
    let mut base = String::with_capacity(CV_BASE_LENGTH);
    for &b in bytes.iter().take(CV_BASE_LENGTH) {
        base.push(CV_BASE_ALPHABET[(b & 0x3f) as usize] as char);
    }
    base
}

/// Number of decimal digits in a positive counter value
fn decimal_digits(mut n: i32) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cv_shape() {
        let cv = CorrelationVector::new();
        let value = cv.value();
        let (base, counter) = value.split_once('.').unwrap();
        assert_eq!(base.len(), CV_BASE_LENGTH);
        assert!(base.bytes().all(|b| CV_BASE_ALPHABET.contains(&b)));
        assert_eq!(counter, "1");
    }

    #[test]
    fn test_increment_advances_counter() {
        let mut cv = CorrelationVector::new();
        let base = cv.value().split_once('.').unwrap().0.to_string();
        assert_eq!(cv.increment(), format!("{base}.2"));
        assert_eq!(cv.increment(), format!("{base}.3"));
    }

    #[test]
    fn test_extend_resets_counter() {
        let mut cv = CorrelationVector::new();
        cv.increment();
        let before = cv.value();
        let extended = cv.extend();
        assert_eq!(extended, format!("{before}.1"));
    }

    #[test]
    fn test_increment_stops_at_length_bound() {
        let mut cv = CorrelationVector::new();
        // Grow the base until a further extension would not fit.
        while cv.value().len() + 2 <= CV_MAX_LENGTH {
            cv.extend();
        }
        // Drive the counter to the last value that still renders <= 63.
        let mut previous = cv.value();
        loop {
            let next = cv.increment();
            if next == previous {
                break;
            }
            previous = next;
        }
        assert!(cv.value().len() <= CV_MAX_LENGTH);
        // Further increments are refused outright.
        let frozen = cv.value();
        cv.increment();
        cv.increment();
        assert_eq!(cv.value(), frozen);
    }

    #[test]
    fn test_extend_refused_when_too_long() {
        let mut cv = CorrelationVector::new();
        while cv.value().len() + 2 <= CV_MAX_LENGTH {
            cv.extend();
        }
        let frozen = cv.value();
        cv.extend();
        assert_eq!(cv.value(), frozen);
        assert!(cv.value().len() <= CV_MAX_LENGTH);
    }

    #[test]
    fn test_values_strictly_increase() {
        let mut cv = CorrelationVector::new();
        let mut last = cv.value();
        for _ in 0..100 {
            let next = cv.increment();
            let last_counter: i32 = last.rsplit_once('.').unwrap().1.parse().unwrap();
            let next_counter: i32 = next.rsplit_once('.').unwrap().1.parse().unwrap();
            assert!(next_counter > last_counter);
            last = next;
        }
    }
}
