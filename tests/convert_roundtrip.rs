//! Round-trip properties of the axis range conversion. Conversions
//! that cross signedness at the same width, and narrowing after a
//! widening, are lossless; verify that over the whole value space.

use hidmap::{convert_range, ValueType};
use proptest::prelude::*;

proptest! {
    #[test]
    fn u8_to_i8_and_back(v in 0u32..=0xFF) {
        let there = convert_range(v, 0, 0xFF, ValueType::I8);
        prop_assert_eq!(convert_range(there, -128, 127, ValueType::U8), v);
    }

    #[test]
    fn i8_to_u8_and_back(v in -128i32..=127) {
        let there = convert_range(v as u32, -128, 127, ValueType::U8);
        prop_assert_eq!(convert_range(there, 0, 0xFF, ValueType::I8), v as u32);
    }

    #[test]
    fn u16_to_i16_and_back(v in 0u32..=0xFFFF) {
        let there = convert_range(v, 0, 0xFFFF, ValueType::I16);
        prop_assert_eq!(
            convert_range(there, i16::MIN, i16::MAX as u16, ValueType::U16),
            v
        );
    }

    #[test]
    fn i16_to_u16_and_back(v in -32768i32..=32767) {
        let there = convert_range(v as u32, i16::MIN, i16::MAX as u16, ValueType::U16);
        prop_assert_eq!(convert_range(there, 0, 0xFFFF, ValueType::I16), v as u32);
    }

    #[test]
    fn u8_through_u16(v in 0u32..=0xFF) {
        let there = convert_range(v, 0, 0xFF, ValueType::U16);
        prop_assert_eq!(convert_range(there, 0, 0xFFFF, ValueType::U8), v);
    }

    #[test]
    fn u8_through_i16(v in 0u32..=0xFF) {
        let there = convert_range(v, 0, 0xFF, ValueType::I16);
        prop_assert_eq!(
            convert_range(there, i16::MIN, i16::MAX as u16, ValueType::U8),
            v
        );
    }

    #[test]
    fn i8_through_i16(v in -128i32..=127) {
        let there = convert_range(v as u32, -128, 127, ValueType::I16);
        prop_assert_eq!(
            convert_range(there, i16::MIN, i16::MAX as u16, ValueType::I8),
            v as u32
        );
    }

    #[test]
    fn i8_through_u16(v in -128i32..=127) {
        let there = convert_range(v as u32, -128, 127, ValueType::U16);
        prop_assert_eq!(convert_range(there, 0, 0xFFFF, ValueType::I8), v as u32);
    }
}
