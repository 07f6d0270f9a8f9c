use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Write};

/// The base in which the digits of an [Element] are written. One digit per Unicode scalar value.
pub const RADIX: u32 = 0x11_0000;

/// A coordinate element: an arbitrary-precision fraction in `[0, 1)` written in base [RADIX].
///
/// A string is mapped to the fraction whose digits are its code points. Hence, the numeric order
/// of two elements is the lexicographic code point order of the strings they were created from.
///
/// Elements are kept normalized (no trailing zero digit) such that the derived comparisons and the
/// hash are numeric. The same value is therefore represented identically on every peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Element {
    /// Most significant digit first.
    digits: Vec<u32>,
}

impl Element {
    /// Creates an element from its digits. Digits that are not smaller than [RADIX] are clamped.
    pub fn from_digits(digits: impl IntoIterator<Item = u32>) -> Self {
        let mut element = Self {
            digits: digits.into_iter().map(|d| d.min(RADIX - 1)).collect(),
        };
        element.normalize();
        element
    }

    /// The element `0`.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn digits(&self) -> &[u32] {
        &self.digits
    }

    pub fn is_zero(&self) -> bool {
        self.digits.is_empty()
    }

    /// Computes the exact average of `a` and `b`.
    ///
    /// If `a < b`, the result is strictly between both values. At most one digit is appended to
    /// the longer of both inputs.
    pub fn middle(a: &Element, b: &Element) -> Element {
        let len = a.digits.len().max(b.digits.len());
        let digit = |e: &Element, i: usize| u64::from(e.digits.get(i).copied().unwrap_or(0));

        // Sum from the least significant digit. The sum of two fractions in [0, 1) may overflow
        // into an integer carry.
        let mut sum = vec![0_u64; len];
        let mut carry = 0_u64;
        for i in (0..len).rev() {
            let value = digit(a, i) + digit(b, i) + carry;
            sum[i] = value % u64::from(RADIX);
            carry = value / u64::from(RADIX);
        }

        // Halve from the most significant digit, starting with the carry.
        let mut digits = Vec::with_capacity(len + 1);
        let mut remainder = carry;
        for value in sum {
            let current = remainder * u64::from(RADIX) + value;
            #[allow(
                clippy::cast_possible_truncation,
                reason = "A halved digit is always smaller than the radix"
            )]
            digits.push((current / 2) as u32);
            remainder = current % 2;
        }
        if remainder == 1 {
            digits.push(RADIX / 2);
        }

        let mut result = Element { digits };
        result.normalize();
        result
    }

    /// Approximates the element as a floating point number, used for heuristics only.
    pub fn to_f64(&self) -> f64 {
        let mut value = 0.0;
        let mut scale = 1.0 / f64::from(RADIX);
        for digit in self.digits.iter().take(4) {
            value += f64::from(*digit) * scale;
            scale /= f64::from(RADIX);
        }
        value
    }

    /// Compares the element with the string `value` as if it was created from it.
    pub fn cmp_str(&self, value: &str) -> Ordering {
        self.cmp(&Element::from(value))
    }

    fn normalize(&mut self) {
        while self.digits.last() == Some(&0) {
            self.digits.pop();
        }
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Self::from_digits(value.chars().map(u32::from))
    }
}

impl From<String> for Element {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<char> for Element {
    fn from(value: char) -> Self {
        Self::from_digits([u32::from(value)])
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for digit in &self.digits {
            match char::from_u32(*digit) {
                Some(c) if c.is_ascii_graphic() => f.write_char(c)?,
                _ => write!(f, "\\u{{{digit:x}}}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn order_follows_code_points() {
        assert!(Element::from("a") < Element::from("b"));
        assert!(Element::from("a") < Element::from("ab"));
        assert!(Element::from("az") < Element::from("b"));
        assert_eq!(Element::from("a\0"), Element::from("a"));
    }

    #[test]
    fn middle_lies_between() {
        let a = Element::from("0");
        let b = Element::from("{");
        let m = Element::middle(&a, &b);
        assert!(a < m && m < b);
        assert_eq!(m.digits(), &[u32::from('U'), RADIX / 2]);
    }

    #[test]
    fn middle_of_adjacent_digits_appends_half() {
        let a = Element::from("a");
        let b = Element::from("b");
        let m = Element::middle(&a, &b);
        assert!(a < m && m < b);
        assert_eq!(m.digits(), &[u32::from('a'), RADIX / 2]);
    }

    #[test]
    fn middle_of_equal_elements_is_identity() {
        let a = Element::from("hello");
        assert_eq!(Element::middle(&a, &a), a);
    }

    #[test]
    fn middle_handles_carries() {
        let a = Element::from_digits([RADIX - 1, RADIX - 1]);
        let b = Element::from_digits([RADIX - 1]);
        let m = Element::middle(&a, &b);
        assert!(b < m && m < a);
    }

    #[test]
    fn approximation_is_monotone() {
        assert!(Element::from("a").to_f64() < Element::from("b").to_f64());
        assert!(Element::from("0").to_f64() > 0.0);
    }

    #[test]
    fn display_escapes_non_ascii() {
        assert_eq!(Element::from("ab\u{a2}").to_string(), "ab\\u{a2}");
    }
}
