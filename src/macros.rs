//! Internal macros for header boilerplate.
//!
//! Page headers store their fields as `zerocopy::little_endian::U64` so they
//! can be parsed in place from unaligned page bytes. `le_u64_accessors!`
//! generates the native-integer getter/setter pairs for such fields:
//!
//! ```ignore
//! impl HeaderBase {
//!     le_u64_accessors! { page_size, size, max_size }
//! }
//! // expands to page_size() / set_page_size(u64), size() / set_size(u64), ...
//! ```

/// Generates `u64` getter and setter methods for little-endian header fields.
#[macro_export]
macro_rules! le_u64_accessors {
    ($($field:ident),* $(,)?) => {
        $(
            ::paste::paste! {
                #[inline]
                pub fn $field(&self) -> u64 {
                    self.$field.get()
                }

                #[inline]
                pub fn [<set_ $field>](&mut self, val: u64) {
                    self.$field = ::zerocopy::little_endian::U64::new(val);
                }
            }
        )*
    };
}
