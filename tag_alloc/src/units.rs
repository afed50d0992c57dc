//! Size units used throughout the heap.
//!
//! Boundary tags are single 4-byte words and every block is a multiple of a
//! double word, regardless of the host's pointer width.

use core::fmt;
use core::ops;

macro_rules! define_unit_type {
    ( $( #[$attr:meta] )* $name:ident ) => {
        $( #[$attr] )*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub usize);

        impl<T: Into<Self>> ops::Add<T> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: T) -> Self {
                $name(self.0 + rhs.into().0)
            }
        }

        impl<T: Into<Self>> ops::Sub<T> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: T) -> Self {
                $name(self.0 - rhs.into().0)
            }
        }

        impl<T: Into<Self>> ops::Mul<T> for $name {
            type Output = Self;

            #[inline]
            fn mul(self, rhs: T) -> Self {
                $name(self.0 * rhs.into().0)
            }
        }

        impl $name {
            /// Checked addition, `None` on overflow.
            #[inline]
            pub fn checked_add<T: Into<Self>>(self, rhs: T) -> Option<Self> {
                self.0.checked_add(rhs.into().0).map($name)
            }
        }
    };
}

define_unit_type!(
    /// A length in bytes.
    Bytes
);
define_unit_type!(
    /// A length in boundary-tag words (4 bytes each).
    Words
);

/// Size of one boundary-tag word.
pub const WORD: Bytes = Bytes(4);

/// Size of a double word, which is also the payload alignment.
pub const DWORD: Bytes = Bytes(8);

/// The default heap growth: one page.
pub const PAGE_SIZE: Bytes = Bytes(1 << 12);

impl From<Words> for Bytes {
    #[inline]
    fn from(words: Words) -> Bytes {
        Bytes(words.0 * WORD.0)
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

/// Rounding a quantity up to a coarser unit.
pub trait RoundUpTo<T> {
    /// Round `self` up to the nearest whole `T`.
    fn round_up_to(self) -> T;
}

impl RoundUpTo<Words> for Bytes {
    #[inline]
    fn round_up_to(self) -> Words {
        Words((self.0 + WORD.0 - 1) / WORD.0)
    }
}

impl Words {
    /// Round up to an even number of words, so the result is a whole number
    /// of double words.
    #[inline]
    pub fn round_up_even(self) -> Words {
        Words(self.0 + (self.0 & 1))
    }
}

impl Bytes {
    /// Round up to the payload alignment, `None` on overflow.
    #[inline]
    pub fn align_up(self) -> Option<Bytes> {
        self.0
            .checked_add(DWORD.0 - 1)
            .map(|n| Bytes(n & !(DWORD.0 - 1)))
    }

    /// Whether this length is a whole number of double words.
    #[inline]
    pub fn is_aligned(self) -> bool {
        self.0 % DWORD.0 == 0
    }
}
