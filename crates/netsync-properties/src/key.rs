//! One-byte property keys.

/// A type usable as a property key: `u8` or a one-byte enum.
///
/// Implement it for enums with [`property_key!`](crate::property_key).
pub trait PropertyKey: Copy + Send + Sync + 'static {
    fn to_byte(self) -> u8;

    fn from_byte(byte: u8) -> Option<Self>;
}

impl PropertyKey for u8 {
    fn to_byte(self) -> u8 {
        self
    }

    fn from_byte(byte: u8) -> Option<Self> {
        Some(byte)
    }
}

/// Declares a `#[repr(u8)]` enum and implements [`PropertyKey`] for it.
///
/// ```
/// netsync_properties::property_key! {
///     pub enum MatchKey {
///         Slots = 4,
///         Map = 5,
///     }
/// }
///
/// use netsync_properties::PropertyKey;
/// assert_eq!(MatchKey::Map.to_byte(), 5);
/// assert_eq!(MatchKey::from_byte(4), Some(MatchKey::Slots));
/// ```
#[macro_export]
macro_rules! property_key {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl $crate::PropertyKey for $name {
            fn to_byte(self) -> u8 {
                self as u8
            }

            fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $value => Some($name::$variant), )+
                    _ => None,
                }
            }
        }
    };
}
