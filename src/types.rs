// SPDX-License-Identifier: MIT

//! The mapping vocabulary shared by the descriptor parser, the preset
//! tables and the report decoder, plus the axis range conversion.

/// Where a decoded segment delivers its data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputChannel {
    Keyboard,
    Mouse,
    Gamepad,
}

/// The value range a gamepad axis is converted to, see
/// [`convert_range`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    U8,
    I8,
    U16,
    I16,
}

/// How a segment's raw field value is interpreted by the decoder.
///
/// The thresholds compare the field value normalized into 0..255
/// against their parameter; `Equal` compares the raw value. `Axis`
/// carries the target range the value is converted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// Produces nothing. Also the preset table terminator.
    None,
    ThresholdBelow(u8),
    ThresholdAbove(u8),
    Scale,
    Array,
    Bitfield,
    Equal(u16),
    Axis(ValueType),
}

/// Mouse output controls carried in a segment's `control` byte.
/// Buttons start at 1, matching the Button page usage minimum of a
/// mouse report descriptor (button 1 is the left button).
pub const MOUSE_BUTTON1: u8 = 1;
pub const MOUSE_BUTTON2: u8 = 2;
pub const MOUSE_BUTTON3: u8 = 3;
pub const MOUSE_BUTTON4: u8 = 4;
pub const MOUSE_BUTTON5: u8 = 5;
pub const MOUSE_X: u8 = 6;
pub const MOUSE_Y: u8 = 7;
pub const MOUSE_WHEEL: u8 = 8;

/// One caller-supplied mapping rule from a descriptor field to an
/// output control.
///
/// A preset matches a field when `pad` equals the 1-based index of
/// the joystick/gamepad report the field belongs to, `usage_page`
/// equals the field's usage page and `usage` equals the field's
/// usage. Several presets may match the same field; each match
/// produces its own segment, which is how a single stick axis can
/// report into both a direction button and an analog axis.
///
/// `control` is delivered to the output verbatim: a HID scancode on
/// the keyboard channel, one of the `MOUSE_*` controls on the mouse
/// channel, a user-defined id on the gamepad channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Preset {
    pub pad: u8,
    pub usage_page: u16,
    pub usage: u32,
    pub channel: OutputChannel,
    pub control: u8,
    pub kind: InputKind,
}

impl Preset {
    /// The table terminator. Scanning a preset table stops at the
    /// first entry whose kind is [`InputKind::None`], or at the end
    /// of the slice.
    pub const END: Preset = Preset {
        pad: 0,
        usage_page: 0,
        usage: 0,
        channel: OutputChannel::Keyboard,
        control: 0,
        kind: InputKind::None,
    };
}

/// Map `value` from the `minimum..=maximum` logical range into 0..255
/// with midpoint rounding. `value` carries sign-extended bits when
/// the logical minimum is negative, flagged by `signed`.
pub(crate) fn normalize_to_u8(value: u32, signed: bool, minimum: i16, maximum: u16) -> u8 {
    let v = if signed {
        value as i32 as i64
    } else {
        value as i64
    };
    let min = minimum as i64;
    let max = maximum as i64;
    if max == min {
        return 0;
    }
    (((v - min) * 0xFF + (max - min) / 2) / (max - min)) as u8
}

/// Convert `value` from the logical range declared by the descriptor
/// to the range of `target_type`.
///
/// The source type is inferred from `(minimum, maximum)`: an exact
/// match against the full range of u8, i8, u16 or i16 picks that
/// type. Conversions are fixed shifts and biases, so the midpoint of
/// the source range maps to the midpoint of the target range.
/// `value` can be signed (in two's complement, sign-extended to 32
/// bits) or unsigned, flagged by `minimum < 0`; signed results come
/// back as two's complement in the returned `u32`.
///
/// Custom ranges (like 1..16 or 0..12000) and 32-bit ranges are not
/// supported: debug builds fail hard, release builds return 0.
pub fn convert_range(value: u32, minimum: i16, maximum: u16, target_type: ValueType) -> u32 {
    let mut source_type = None;

    if minimum == 0 && maximum == u8::MAX as u16 {
        source_type = Some(ValueType::U8);
    } else if minimum == i8::MIN as i16 && maximum == i8::MAX as u16 {
        source_type = Some(ValueType::I8);
    } else if minimum == 0 && maximum == u16::MAX {
        source_type = Some(ValueType::U16);
    }
    if minimum == i16::MIN && maximum == i16::MAX as u16 {
        source_type = Some(ValueType::I16);
    }

    if source_type == Some(target_type) {
        return value;
    }

    match (source_type, target_type) {
        (Some(ValueType::I8), ValueType::U8) => (value as i32 + 0x80) as u32,
        (Some(ValueType::I8), ValueType::U16) => ((value as i32 + 0x80) << 8) as u32,
        (Some(ValueType::I8), ValueType::I16) => ((value as i32) << 8) as u32,

        (Some(ValueType::U8), ValueType::I8) => (value as i32 - 0x80) as u32,
        (Some(ValueType::U8), ValueType::U16) => value << 8,
        (Some(ValueType::U8), ValueType::I16) => ((value << 8) as i32 - 0x8000) as u32,

        (Some(ValueType::I16), ValueType::U8) => ((value as i32 + 0x8000) >> 8) as u32,
        (Some(ValueType::I16), ValueType::I8) => ((value as i32) >> 8) as u32,
        (Some(ValueType::I16), ValueType::U16) => (value as i32 + 0x8000) as u32,

        (Some(ValueType::U16), ValueType::U8) => value >> 8,
        (Some(ValueType::U16), ValueType::I8) => ((value >> 8) as i32 - 0x80) as u32,
        (Some(ValueType::U16), ValueType::I16) => (value as i32 - 0x8000) as u32,

        _ => {
            // 32-bit and custom input ranges are not implemented.
            debug_assert!(
                false,
                "unsupported value range {minimum}..{maximum} -> {target_type:?}"
            );
            0
        }
    }
}
