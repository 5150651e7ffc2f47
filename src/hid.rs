// SPDX-License-Identifier: MIT

//! Splitting a HID report descriptor byte stream into its individual
//! items. Interpretation of the resulting [`ShortItem`]s, building
//! reports and segments out of them, is left to the caller.
//!
//! In this document and unless stated otherwise, a reference to
//! "Section a.b.c" refers to the
//! [HID Device Class Definition for HID 1.11](https://www.usb.org/document-library/device-class-definition-hid-111).
//!
//! Entry point is [`Items::new(bytes)`](Items::new):
//!
//! ```
//! # use hidmap::hid::*;
//! # fn walk(bytes: &[u8]) -> Result<(), hidmap::Error> {
//! for item in Items::new(bytes) {
//!     let item = item?;
//!     if let ItemType::Main(MainItem::Input(input)) = item.decode() {
//!         println!("Input item at offset {}, variable: {}", item.offset(), input.is_variable);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::{ensure, Error, Result};

/// Long items (Section 6.2.2.3) share the short-item prefix encoding
/// with this tag nibble.
const LONG_ITEM_TAG: u8 = 0x0F;

/// The item type encoded in bits 2..4 of a short item prefix,
/// see Section 6.2.2.2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ItemClass {
    Main,
    Global,
    Local,
    Reserved,
}

/// A short item's data payload, decoded little-endian regardless of
/// the host byte order. Logical minima may be negative, so both the
/// unsigned and the sign-extended reading are kept; which one applies
/// depends on state the tokenizer does not have (Section 6.2.2.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItemValue {
    bits: u32,
    nbytes: u8,
}

impl ItemValue {
    fn new(data: &[u8]) -> ItemValue {
        let bits = match data.len() {
            0 => 0,
            1 => data[0] as u32,
            2 => u16::from_le_bytes(data[0..2].try_into().unwrap()) as u32,
            4 => u32::from_le_bytes(data[0..4].try_into().unwrap()),
            n => panic!("item data length {n} cannot happen"),
        };
        ItemValue {
            bits,
            nbytes: data.len() as u8,
        }
    }

    /// The payload zero-extended to 32 bits.
    pub fn unsigned(&self) -> u32 {
        self.bits
    }

    /// The payload sign-extended from its encoded width to 32 bits.
    pub fn signed(&self) -> i32 {
        match self.nbytes {
            0 => 0,
            1 => self.bits as u8 as i8 as i32,
            2 => self.bits as u16 as i16 as i32,
            _ => self.bits as i32,
        }
    }
}

/// The decoded type of one short item: a [`MainItem`], [`GlobalItem`]
/// or [`LocalItem`], or a reserved item type the parser skips.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemType {
    Main(MainItem),
    Global(GlobalItem),
    Local(LocalItem),
    Reserved,
}

/// Main items either declare report data fields (Input, Output,
/// Feature) or structure the descriptor (Collection, End Collection),
/// see Section 6.2.2.4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MainItem {
    Input(InputItem),
    Output,
    Feature,
    Collection(CollectionKind),
    EndCollection,
    Reserved { tag: u8 },
}

/// The data flags of an Input main item, see Section 6.2.2.5.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputItem {
    pub is_constant: bool,
    pub is_variable: bool,
    pub is_relative: bool,
    pub wraps: bool,
    pub is_nonlinear: bool,
    pub has_no_preferred_state: bool,
    pub has_null_state: bool,
    // bit 7 is reserved for Input items (volatile in Output/Feature)
    pub is_buffered_bytes: bool,
}

impl From<u32> for InputItem {
    fn from(data: u32) -> InputItem {
        let flag = |bit: u32| data & (1 << bit) != 0;
        InputItem {
            is_constant: flag(0),
            is_variable: flag(1),
            is_relative: flag(2),
            wraps: flag(3),
            is_nonlinear: flag(4),
            has_no_preferred_state: flag(5),
            has_null_state: flag(6),
            is_buffered_bytes: flag(8),
        }
    }
}

/// Collection Item, see Section 6.2.2.6. Only
/// [`CollectionKind::Application`] affects report emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionKind {
    Physical,
    Application,
    Logical,
    Report,
    NamedArray,
    UsageSwitch,
    UsageModifier,
    Reserved { value: u8 },
    VendorDefined { value: u8 },
}

impl From<u8> for CollectionKind {
    fn from(v: u8) -> CollectionKind {
        match v {
            0x00 => CollectionKind::Physical,
            0x01 => CollectionKind::Application,
            0x02 => CollectionKind::Logical,
            0x03 => CollectionKind::Report,
            0x04 => CollectionKind::NamedArray,
            0x05 => CollectionKind::UsageSwitch,
            0x06 => CollectionKind::UsageModifier,
            value @ 0x07..=0x7f => CollectionKind::Reserved { value },
            value @ 0x80..=0xff => CollectionKind::VendorDefined { value },
        }
    }
}

/// Global items, see Section 6.2.2.7. They set persistent context
/// that survives until overwritten by another item of the same tag.
///
/// Push and Pop are recognized but not supported by the interpreter;
/// Unit and Unit Exponent are recognized and ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalItem {
    UsagePage(u16),
    LogicalMinimum(ItemValue),
    LogicalMaximum(ItemValue),
    PhysicalMinimum(ItemValue),
    PhysicalMaximum(ItemValue),
    UnitExponent(u32),
    Unit(u32),
    ReportSize(u8),
    ReportId(u8),
    ReportCount(u8),
    Push,
    Pop,
    Reserved { tag: u8 },
}

/// Local items, see Section 6.2.2.8. They apply only to the next
/// main item; the interpreter clears them after every main item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalItem {
    Usage(u32),
    UsageMinimum(u32),
    UsageMaximum(u32),
    Reserved { tag: u8 },
}

mod tags {
    pub mod main {
        pub const INPUT: u8 = 0x08;
        pub const OUTPUT: u8 = 0x09;
        pub const COLLECTION: u8 = 0x0A;
        pub const FEATURE: u8 = 0x0B;
        pub const END_COLLECTION: u8 = 0x0C;
    }
    pub mod global {
        pub const USAGE_PAGE: u8 = 0x00;
        pub const LOGICAL_MINIMUM: u8 = 0x01;
        pub const LOGICAL_MAXIMUM: u8 = 0x02;
        pub const PHYSICAL_MINIMUM: u8 = 0x03;
        pub const PHYSICAL_MAXIMUM: u8 = 0x04;
        pub const UNIT_EXPONENT: u8 = 0x05;
        pub const UNIT: u8 = 0x06;
        pub const REPORT_SIZE: u8 = 0x07;
        pub const REPORT_ID: u8 = 0x08;
        pub const REPORT_COUNT: u8 = 0x09;
        pub const PUSH: u8 = 0x0A;
        pub const POP: u8 = 0x0B;
    }
    pub mod local {
        pub const USAGE: u8 = 0x00;
        pub const USAGE_MINIMUM: u8 = 0x01;
        pub const USAGE_MAXIMUM: u8 = 0x02;
    }
}

/// A single short item as found in the descriptor byte stream:
/// the one-byte prefix (data size in bits 0..2, type in bits 2..4,
/// tag in bits 4..8) followed by 0, 1, 2 or 4 data bytes.
#[derive(Clone, Copy, Debug)]
pub struct ShortItem<'a> {
    offset: usize,
    prefix: u8,
    data: &'a [u8],
}

impl<'a> ShortItem<'a> {
    /// The byte offset of this item in the descriptor.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The item's data payload, 0 to 4 bytes, little-endian.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    fn class(&self) -> ItemClass {
        match (self.prefix >> 2) & 0b11 {
            0 => ItemClass::Main,
            1 => ItemClass::Global,
            2 => ItemClass::Local,
            _ => ItemClass::Reserved,
        }
    }

    fn tag(&self) -> u8 {
        self.prefix >> 4
    }

    fn value(&self) -> ItemValue {
        ItemValue::new(self.data)
    }

    /// Decode prefix and payload into a typed item.
    pub fn decode(&self) -> ItemType {
        let tag = self.tag();
        let value = self.value();
        match self.class() {
            ItemClass::Main => ItemType::Main(match tag {
                tags::main::INPUT => MainItem::Input(InputItem::from(value.unsigned())),
                tags::main::OUTPUT => MainItem::Output,
                tags::main::FEATURE => MainItem::Feature,
                tags::main::COLLECTION => {
                    MainItem::Collection(CollectionKind::from(value.unsigned() as u8))
                }
                tags::main::END_COLLECTION => MainItem::EndCollection,
                tag => MainItem::Reserved { tag },
            }),
            ItemClass::Global => ItemType::Global(match tag {
                tags::global::USAGE_PAGE => GlobalItem::UsagePage(value.unsigned() as u16),
                tags::global::LOGICAL_MINIMUM => GlobalItem::LogicalMinimum(value),
                tags::global::LOGICAL_MAXIMUM => GlobalItem::LogicalMaximum(value),
                tags::global::PHYSICAL_MINIMUM => GlobalItem::PhysicalMinimum(value),
                tags::global::PHYSICAL_MAXIMUM => GlobalItem::PhysicalMaximum(value),
                tags::global::UNIT_EXPONENT => GlobalItem::UnitExponent(value.unsigned()),
                tags::global::UNIT => GlobalItem::Unit(value.unsigned()),
                tags::global::REPORT_SIZE => GlobalItem::ReportSize(value.unsigned() as u8),
                tags::global::REPORT_ID => GlobalItem::ReportId(value.unsigned() as u8),
                tags::global::REPORT_COUNT => GlobalItem::ReportCount(value.unsigned() as u8),
                tags::global::PUSH => GlobalItem::Push,
                tags::global::POP => GlobalItem::Pop,
                tag => GlobalItem::Reserved { tag },
            }),
            ItemClass::Local => ItemType::Local(match tag {
                tags::local::USAGE => LocalItem::Usage(value.unsigned()),
                tags::local::USAGE_MINIMUM => LocalItem::UsageMinimum(value.unsigned()),
                tags::local::USAGE_MAXIMUM => LocalItem::UsageMaximum(value.unsigned()),
                tag => LocalItem::Reserved { tag },
            }),
            ItemClass::Reserved => ItemType::Reserved,
        }
    }
}

/// Iterator over the short items of a report descriptor.
///
/// Yields one [`ShortItem`] per item, or an error on a truncated
/// item or on a long item (Section 6.2.2.3: no long item tags are
/// defined by the specification and this parser rejects them).
/// After an error the iterator is fused.
#[derive(Debug)]
pub struct Items<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Items<'a> {
    pub fn new(bytes: &'a [u8]) -> Items<'a> {
        Items { bytes, offset: 0 }
    }

    fn fetch(&mut self) -> Result<ShortItem<'a>> {
        let offset = self.offset;
        let rest = &self.bytes[offset..];
        let prefix = rest[0];

        if prefix >> 4 == LONG_ITEM_TAG {
            // Long item framing: prefix, data size, long tag, payload.
            ensure!(
                rest.len() >= 3,
                Error::InvalidData {
                    offset,
                    message: "truncated long item header".into(),
                }
            );
            let size = rest[1] as usize;
            ensure!(
                rest.len() >= 3 + size,
                Error::InvalidData {
                    offset,
                    message: "truncated long item payload".into(),
                }
            );
            return Err(Error::LongItem { offset });
        }

        let size = match prefix & 0b11 {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 4,
        };
        ensure!(
            rest.len() > size,
            Error::InvalidData {
                offset,
                message: "truncated item payload".into(),
            }
        );

        self.offset += 1 + size;
        Ok(ShortItem {
            offset,
            prefix,
            data: &rest[1..1 + size],
        })
    }
}

impl<'a> Iterator for Items<'a> {
    type Item = Result<ShortItem<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let item = self.fetch();
        if item.is_err() {
            // fuse
            self.offset = self.bytes.len();
        }
        Some(item)
    }
}
