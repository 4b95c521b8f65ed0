//! Key ordering strategies.

use std::cmp::Ordering;
use tracing::trace;

/// Strategy mapping a key to the form it is ordered and addressed by.
///
/// The strategy is chosen once when a tree collection is opened and recorded
/// in its data file. Two keys whose folded forms are equal address the same
/// slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyFold {
    /// Case-insensitive lexicographic order via simple case folding.
    ///
    /// `"Foo"`, `"foo"` and `"FOO"` are the same key.
    #[default]
    CaseInsensitive,
    /// Byte-for-byte key order, no folding.
    Exact,
}

impl KeyFold {
    /// Returns the folded (ordering) form of `key`.
    #[must_use]
    pub fn fold(&self, key: &str) -> String {
        match self {
            Self::CaseInsensitive => key.to_lowercase(),
            Self::Exact => key.to_owned(),
        }
    }

    /// Compares two possibly-missing keys in folded order.
    ///
    /// A missing operand can show up during boundary lookups (an unbounded
    /// range end, an empty tree). It is compared as the empty string, with a
    /// diagnostic trace, rather than faulting.
    #[must_use]
    pub fn compare(&self, a: Option<&str>, b: Option<&str>) -> Ordering {
        if a.is_none() || b.is_none() {
            trace!(?a, ?b, "comparing with a missing key, substituting \"\"");
        }
        self.fold(a.unwrap_or("")).cmp(&self.fold(b.unwrap_or("")))
    }

    /// On-disk tag for this strategy.
    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::CaseInsensitive => 0,
            Self::Exact => 1,
        }
    }

    /// Reverses [`KeyFold::tag`].
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::CaseInsensitive),
            1 => Some(Self::Exact),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_folds_equal() {
        let fold = KeyFold::CaseInsensitive;
        assert_eq!(fold.fold("Foo"), fold.fold("fOO"));
        assert_eq!(fold.compare(Some("Foo"), Some("foo")), Ordering::Equal);
        assert_eq!(fold.compare(Some("bar"), Some("Foo")), Ordering::Less);
    }

    #[test]
    fn exact_fold_distinguishes_case() {
        let fold = KeyFold::Exact;
        assert_ne!(fold.compare(Some("Foo"), Some("foo")), Ordering::Equal);
    }

    #[test]
    fn missing_operand_is_empty_string() {
        let fold = KeyFold::CaseInsensitive;
        assert_eq!(fold.compare(None, Some("a")), Ordering::Less);
        assert_eq!(fold.compare(Some("a"), None), Ordering::Greater);
        assert_eq!(fold.compare(None, None), Ordering::Equal);
        assert_eq!(fold.compare(None, Some("")), Ordering::Equal);
    }

    #[test]
    fn tags_round_trip() {
        for fold in [KeyFold::CaseInsensitive, KeyFold::Exact] {
            assert_eq!(KeyFold::from_tag(fold.tag()), Some(fold));
        }
        assert_eq!(KeyFold::from_tag(9), None);
    }
}
