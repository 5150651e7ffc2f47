// SPDX-License-Identifier: MIT

//! This crate is the input-mapping core of a controller bridge: it
//! parses a device's HID report descriptor into a set of bit-level
//! extraction rules and then decodes each incoming input report into
//! gamepad, keyboard and mouse events.
//!
//! Parsing is driven by a caller-supplied [`Preset`] table that maps
//! descriptor usages (buttons, axes, hat switches) onto user-defined
//! output controls; keyboards and mice need no presets. The [hid]
//! module splits the descriptor byte stream into items and the [hut]
//! module names the usages the mapper understands.
//!
//! Entry point is a [`HidMapper`], fed first the descriptor and then
//! each report:
//!
//! ```
//! use hidmap::{hut, EventSinks, HidMapper, InputKind, OutputChannel, Preset};
//!
//! // An eight button gamepad: one application collection, one byte
//! // of button bits.
//! let descriptor = [
//!     0x05, 0x01, // Usage Page (Generic Desktop)
//!     0x09, 0x05, // Usage (Gamepad)
//!     0xA1, 0x01, // Collection (Application)
//!     0x05, 0x09, //   Usage Page (Button)
//!     0x19, 0x01, //   Usage Minimum (1)
//!     0x29, 0x08, //   Usage Maximum (8)
//!     0x15, 0x00, //   Logical Minimum (0)
//!     0x25, 0x01, //   Logical Maximum (1)
//!     0x75, 0x01, //   Report Size (1)
//!     0x95, 0x08, //   Report Count (8)
//!     0x81, 0x02, //   Input (Data, Variable, Absolute)
//!     0xC0, // End Collection
//! ];
//! let presets = [Preset {
//!     pad: 1,
//!     usage_page: hut::page::BUTTON,
//!     usage: 1,
//!     channel: OutputChannel::Gamepad,
//!     control: 0,
//!     kind: InputKind::ThresholdAbove(0),
//! }];
//!
//! let mut mapper = HidMapper::new();
//! mapper.parse_descriptor(&descriptor, &presets).unwrap();
//!
//! let mut fired = Vec::new();
//! let mut gamepad = |control: u32, value: u32| fired.push((control, value));
//! let mut sinks = EventSinks {
//!     gamepad: Some(&mut gamepad),
//!     ..EventSinks::default()
//! };
//! mapper.parse_report(&[0x01], &mut sinks).unwrap();
//! assert_eq!(fired, vec![(0, 1)]);
//! ```
//!
//! # Resource model
//!
//! All parsed state lives in a fixed-capacity arena owned by the
//! [`HidMapper`]; no heap allocation happens after construction, and
//! [`HidMapper::parse_descriptor`] resets the arena wholesale before
//! each parse. The mapper is single-threaded and synchronous: no
//! operation suspends or blocks, and callers must not re-enter it
//! (decode from one execution context, or gate calls externally).
//!
//! In this document and unless stated otherwise, a reference to
//! "Section a.b.c" refers to the
//! [HID Device Class Definition for HID 1.11](https://www.usb.org/document-library/device-class-definition-hid-111).

use thiserror::Error;

pub mod hid;
pub mod hut;
pub mod types;

mod arena;

use arena::{Arena, ReportIdx, SegmentIdx};
use hid::{CollectionKind, GlobalItem, InputItem, ItemType, LocalItem, MainItem};
use hut::generic_desktop;
pub use types::*;

macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            return Err($err);
        }
    };
}
pub(crate) use ensure;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or truncated descriptor bytes.
    #[error("invalid data at offset {offset}: {message}")]
    InvalidData { offset: usize, message: String },
    /// Long items (Section 6.2.2.3) are not supported.
    #[error("unsupported long item at offset {offset}")]
    LongItem { offset: usize },
    /// The report/segment pools are full; the descriptor does not
    /// fit the arena.
    #[error("descriptor state arena exhausted")]
    ArenaFull,
    /// No parsed report matches the report id prefix.
    #[error("unknown report id {0}")]
    UnknownReportId(u8),
    /// No descriptor has been parsed, or it produced no reports.
    #[error("no reports parsed")]
    NoReports,
    /// The input report carries fewer bytes than the descriptor
    /// declared.
    #[error("report too short: {len} bytes for a {bits} bit report")]
    ReportTooShort { len: usize, bits: u16 },
    /// A segment reaches past the end of the declared report.
    #[error("segment at bit {start_bit} exceeds the {bits} bit report")]
    SegmentOutOfRange { start_bit: u16, bits: u16 },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Usages buffered per main item. The HID specification sets no
/// limit; real devices rarely declare more than ten.
const MAX_USAGES: usize = 16;

/// Bit map for the 256 possible key scancodes.
const KEYBOARD_STATE_SIZE: usize = 256 / 8;

/// One bit-level extraction rule owned by a [`Report`]: where the
/// field sits in the report payload, how wide it is, and what output
/// it feeds.
#[derive(Clone, Copy, Debug)]
pub struct Segment {
    /// Bit offset from the start of the report payload (the report
    /// id byte included, if any).
    pub start_bit: u16,
    /// Field width in bits. Fields wider than 16 bits are narrowed.
    pub report_size: u8,
    /// Number of adjacent fields the rule covers; used by bitfield
    /// and array rules.
    pub report_count: u8,
    pub logical_minimum: i16,
    pub logical_maximum: u16,
    pub channel: OutputChannel,
    /// Keyboard scancode, `MOUSE_*` control or user gamepad control.
    pub control: u8,
    pub kind: InputKind,
    pub(crate) next: Option<SegmentIdx>,
}

impl Default for Segment {
    fn default() -> Segment {
        Segment {
            start_bit: 0,
            report_size: 0,
            report_count: 0,
            logical_minimum: 0,
            logical_maximum: 0,
            channel: OutputChannel::Keyboard,
            control: 0,
            kind: InputKind::None,
            next: None,
        }
    }
}

impl Segment {
    /// The number of payload bits the decoder reads for this rule:
    /// one bit per covered field for bitfield rules, one field width
    /// otherwise.
    pub fn extent_bits(&self) -> u16 {
        match self.kind {
            InputKind::Bitfield => self.report_count as u16,
            _ => self.report_size as u16,
        }
    }
}

/// Tracks pressed keys across successive reports so the decoder can
/// emit edge events. Keys are re-asserted by every report; whatever
/// is not set again counts as released.
#[derive(Clone, Copy, Debug, Default)]
struct KeyboardState {
    keys: [u8; KEYBOARD_STATE_SIZE],
    old_keys: [u8; KEYBOARD_STATE_SIZE],
}

impl KeyboardState {
    fn set_key(&mut self, code: u8) {
        self.keys[(code >> 3) as usize] |= 1 << (code & 0x07);
    }

    /// Emit one `(code, pressed)` event per changed key, then make
    /// the current set the previous one and clear it.
    fn latch(&mut self, mut callback: impl FnMut(u8, bool)) {
        for byte in 0..KEYBOARD_STATE_SIZE {
            let changed = self.keys[byte] ^ self.old_keys[byte];
            if changed == 0 {
                continue;
            }
            for bit in 0..8 {
                if changed & (1 << bit) != 0 {
                    let code = ((byte << 3) | bit) as u8;
                    callback(code, self.keys[byte] & (1 << bit) != 0);
                }
            }
        }
        self.old_keys = self.keys;
        self.keys = [0; KEYBOARD_STATE_SIZE];
    }
}

/// One HID input report layout: the report id it answers to, the
/// application collection it came from, its length and its segments.
#[derive(Clone, Debug, Default)]
pub struct Report {
    pub(crate) report_id: u8,
    pub(crate) app_usage: u16,
    pub(crate) app_usage_page: u16,
    pub(crate) length: u16,
    pub(crate) keyboard: KeyboardState,
    pub(crate) segments: Option<SegmentIdx>,
    pub(crate) next: Option<ReportIdx>,
}

impl Report {
    /// The report id, 0 when the interface does not use report ids.
    pub fn report_id(&self) -> u8 {
        self.report_id
    }

    /// The usage of the application collection this report belongs
    /// to, e.g. [`hut::generic_desktop::GAMEPAD`].
    pub fn application_usage(&self) -> u16 {
        self.app_usage
    }

    /// The usage page of the application collection.
    pub fn application_usage_page(&self) -> u16 {
        self.app_usage_page
    }

    /// The size of this report on the wire, in bits, including the
    /// report id prefix if any.
    pub fn size_in_bits(&self) -> u16 {
        self.length
    }

    /// The size in bytes, rounded up to fit all bits.
    pub fn size_in_bytes(&self) -> usize {
        (self.length as usize).div_ceil(8)
    }
}

/// Accumulates relative mouse motion and button state between
/// callback deliveries.
#[derive(Clone, Copy, Debug, Default)]
struct MouseState {
    dx: i16,
    dy: i16,
    dz: i16,
    buttons: u8,
    changed: bool,
}

impl MouseState {
    fn set_button(&mut self, button: u8, pressed: bool) {
        if pressed {
            self.buttons |= 1 << button;
        } else {
            self.buttons &= !(1 << button);
        }
        self.changed = true;
    }

    fn movement(&mut self, dx: i32, dy: i32, dz: i32) {
        self.dx = self.dx.wrapping_add(dx as i16);
        self.dy = self.dy.wrapping_add(dy as i16);
        self.dz = self.dz.wrapping_add(dz as i16);
        self.changed = true;
    }
}

/// The output callbacks of one [`HidMapper::parse_report`] call.
/// Absent sinks suppress the corresponding delivery: without a
/// keyboard sink no key diffing happens, without a mouse sink the
/// mouse accumulator keeps accumulating.
#[derive(Default)]
pub struct EventSinks<'a> {
    /// `(control, value)`: `control` is the preset's output control
    /// verbatim, `value` is 1 for boolean triggers or the converted
    /// axis value.
    pub gamepad: Option<&'a mut dyn FnMut(u32, u32)>,
    /// `(scancode, pressed)`: edge-triggered from diffing
    /// successive reports.
    pub keyboard: Option<&'a mut dyn FnMut(u8, bool)>,
    /// `(dx, dy, dz, buttons)`: deltas accumulated since the
    /// previous delivery; buttons is a bitmask, bit 0 = button 1.
    pub mouse: Option<&'a mut dyn FnMut(i16, i16, i16, u8)>,
}

/// Persistent context set by global items, see Section 6.2.2.7.
#[derive(Debug, Default)]
struct Globals {
    usage_page: u16,
    logical_minimum: i32,
    logical_maximum: u32,
    report_id: u8,
    report_size: u8,
    report_count: u8,
}

/// Per-main-item context set by local items, see Section 6.2.2.8.
#[derive(Debug, Default)]
struct Locals {
    usage: u32,
    usage_minimum: Option<u32>,
    usage_maximum: Option<u32>,
}

#[derive(Debug, Default)]
struct ParseState {
    globals: Globals,
    locals: Locals,
    usages: [u8; MAX_USAGES],
    usages_len: usize,
    /// Running bit cursor within the current report.
    start_bit: u16,
    /// Usage and usage page of the enclosing application collection.
    app_usage: u16,
    app_usage_page: u16,
    /// 1-based index of the current joystick/gamepad report, matched
    /// against [`Preset::pad`].
    joy_index: u8,
}

/// The descriptor parser and report decoder. See the crate docs for
/// the data flow and an example.
#[derive(Debug)]
pub struct HidMapper {
    arena: Arena,
    reports_head: Option<ReportIdx>,
    uses_report_ids: bool,
    mouse: MouseState,
}

impl Default for HidMapper {
    fn default() -> HidMapper {
        HidMapper::new()
    }
}

impl HidMapper {
    pub fn new() -> HidMapper {
        HidMapper {
            arena: Arena::new(),
            reports_head: None,
            uses_report_ids: false,
            mouse: MouseState::default(),
        }
    }

    /// Whether the parsed descriptor declared report ids. If so,
    /// byte 0 of every input report is the id.
    pub fn uses_report_ids(&self) -> bool {
        self.uses_report_ids
    }

    /// Iterate the parsed reports, most recently declared first.
    pub fn reports(&self) -> Reports<'_> {
        Reports {
            arena: &self.arena,
            cursor: self.reports_head,
        }
    }

    /// Iterate a report's segments, most recently emitted first.
    /// `report` must come from [`HidMapper::reports`] on this mapper
    /// after the most recent parse.
    pub fn segments(&self, report: &Report) -> Segments<'_> {
        Segments {
            arena: &self.arena,
            cursor: report.segments,
        }
    }

    /// Interpret a HID report descriptor, matching its fields against
    /// `presets` (scanned up to the first [`InputKind::None`] entry).
    ///
    /// All state from a previous parse is discarded first; on failure
    /// the partial result is unusable and the next call starts clean.
    pub fn parse_descriptor(&mut self, bytes: &[u8], presets: &[Preset]) -> Result<()> {
        self.arena.reset();
        self.reports_head = None;
        self.uses_report_ids = false;

        let mut st = ParseState::default();
        let mut current: Option<ReportIdx> = None;
        let mut depth: u8 = 0;
        let mut matched: u128 = 0;

        for item in hid::Items::new(bytes) {
            let item = item?;
            match item.decode() {
                ItemType::Main(main) => {
                    match main {
                        MainItem::Input(input) => {
                            self.handle_input(&mut st, &mut current, input, presets, &mut matched)?;
                        }
                        MainItem::Collection(kind) => {
                            depth = depth.saturating_add(1);
                            if kind == CollectionKind::Application {
                                // Remember what sort of device this
                                // collection describes.
                                st.app_usage = st.locals.usage as u16;
                                st.app_usage_page = st.globals.usage_page;
                            }
                        }
                        MainItem::EndCollection => {
                            depth = depth.saturating_sub(1);
                            if depth == 0 {
                                st.app_usage = 0;
                                st.app_usage_page = 0;
                            }
                        }
                        MainItem::Output | MainItem::Feature => {}
                        MainItem::Reserved { tag } => {
                            log::debug!("skipping reserved main item tag {tag:#x}");
                        }
                    }
                    // Local items apply to a single main item.
                    st.locals = Locals::default();
                    st.usages_len = 0;
                }
                ItemType::Global(global) => match global {
                    GlobalItem::UsagePage(page) => st.globals.usage_page = page,
                    GlobalItem::LogicalMinimum(v) => st.globals.logical_minimum = v.signed(),
                    GlobalItem::LogicalMaximum(v) => {
                        // The sign of the minimum decides how the
                        // maximum reads (Section 6.2.2.7 leaves this
                        // to the minimum's sign).
                        st.globals.logical_maximum = if st.globals.logical_minimum < 0 {
                            v.signed() as u32
                        } else {
                            v.unsigned()
                        };
                    }
                    GlobalItem::ReportSize(size) => st.globals.report_size = size,
                    GlobalItem::ReportCount(count) => st.globals.report_count = count,
                    GlobalItem::ReportId(id) => {
                        self.uses_report_ids = true;
                        // The input report opens with the id byte.
                        st.start_bit = item.data().len() as u16 * 8;
                        st.globals.report_id = id;
                        current = None;
                    }
                    GlobalItem::PhysicalMinimum(_) | GlobalItem::PhysicalMaximum(_) => {}
                    GlobalItem::Unit(_) | GlobalItem::UnitExponent(_) => {}
                    GlobalItem::Push | GlobalItem::Pop => {
                        log::warn!("global state push/pop is not supported, item ignored");
                    }
                    GlobalItem::Reserved { tag } => {
                        log::debug!("skipping reserved global item tag {tag:#x}");
                    }
                },
                ItemType::Local(local) => match local {
                    LocalItem::Usage(usage) => {
                        st.locals.usage = usage;
                        if st.usages_len < MAX_USAGES {
                            st.usages[st.usages_len] = usage as u8;
                            st.usages_len += 1;
                        } else {
                            log::warn!("usage list full, dropping usage {usage:#x}");
                        }
                    }
                    LocalItem::UsageMinimum(min) => st.locals.usage_minimum = Some(min),
                    LocalItem::UsageMaximum(max) => st.locals.usage_maximum = Some(max),
                    LocalItem::Reserved { tag } => {
                        log::debug!("skipping reserved local item tag {tag:#x}");
                    }
                },
                ItemType::Reserved => {}
            }
        }

        warn_unmatched_presets(presets, matched);
        Ok(())
    }

    /// An Input main item: emit segments if the enclosing application
    /// collection is one we map, then advance the bit cursor either
    /// way.
    fn handle_input(
        &mut self,
        st: &mut ParseState,
        current: &mut Option<ReportIdx>,
        input: InputItem,
        presets: &[Preset],
        matched: &mut u128,
    ) -> Result<()> {
        let mapped_application = st.app_usage_page == hut::page::GENERIC_DESKTOP
            && matches!(
                st.app_usage,
                generic_desktop::JOYSTICK
                    | generic_desktop::GAMEPAD
                    | generic_desktop::KEYBOARD
                    | generic_desktop::MOUSE
            );

        if mapped_application {
            let report = match *current {
                Some(report) => report,
                None => {
                    let report = self
                        .arena
                        .alloc_report(Report {
                            report_id: st.globals.report_id,
                            app_usage: st.app_usage,
                            app_usage_page: st.app_usage_page,
                            length: 0,
                            keyboard: KeyboardState::default(),
                            segments: None,
                            next: self.reports_head,
                        })
                        .ok_or(Error::ArenaFull)?;
                    self.reports_head = Some(report);
                    if st.app_usage == generic_desktop::JOYSTICK
                        || st.app_usage == generic_desktop::GAMEPAD
                    {
                        st.joy_index += 1;
                    }
                    *current = Some(report);
                    report
                }
            };

            if input.is_variable {
                if st.usages_len > 0 {
                    self.emit_usage_segments(report, st, presets, matched)?;
                } else if let (Some(min), Some(max)) =
                    (st.locals.usage_minimum, st.locals.usage_maximum)
                {
                    if st.globals.report_size == 1 {
                        self.emit_bitfield_segments(report, st, presets, matched, min, max)?;
                    }
                }
                // A variable input without usages or a usage range
                // declares nothing we can map.
            } else {
                self.emit_array_segments(report, st)?;
            }
        }

        let advance = (st.globals.report_size as u16).wrapping_mul(st.globals.report_count as u16);
        st.start_bit = st.start_bit.wrapping_add(advance);
        if let Some(report) = *current {
            self.arena.report_mut(report).length = st.start_bit;
        }
        Ok(())
    }

    /// Variable field with discrete usages: one segment per buffered
    /// usage. Mouse collections map X/Y/wheel directly, joystick and
    /// gamepad collections go through the preset table.
    fn emit_usage_segments(
        &mut self,
        report: ReportIdx,
        st: &mut ParseState,
        presets: &[Preset],
        matched: &mut u128,
    ) -> Result<()> {
        let mut start_bit = st.start_bit;
        for i in 0..st.usages_len {
            if st.app_usage_page != hut::page::GENERIC_DESKTOP {
                continue;
            }
            if st.app_usage == generic_desktop::MOUSE {
                let segment = self.create_segment(report, st, start_bit)?;
                start_bit = start_bit.wrapping_add(st.globals.report_size as u16);
                if st.globals.usage_page == hut::page::GENERIC_DESKTOP {
                    let segment = self.arena.segment_mut(segment);
                    segment.channel = OutputChannel::Mouse;
                    match st.usages[i] as u16 {
                        generic_desktop::X => {
                            segment.control = MOUSE_X;
                            segment.kind = InputKind::Scale;
                        }
                        generic_desktop::Y => {
                            segment.control = MOUSE_Y;
                            segment.kind = InputKind::Scale;
                        }
                        generic_desktop::WHEEL => {
                            segment.control = MOUSE_WHEEL;
                            segment.kind = InputKind::Scale;
                        }
                        _ => {}
                    }
                }
            } else if st.app_usage == generic_desktop::JOYSTICK
                || st.app_usage == generic_desktop::GAMEPAD
            {
                st.locals.usage = st.usages[i] as u32;
                self.scan_presets(report, st, presets, start_bit, matched)?;
                start_bit = start_bit.wrapping_add(st.globals.report_size as u16);
            }
        }
        Ok(())
    }

    /// Variable 1-bit fields declared as a usage range. Keyboards and
    /// mouse buttons get a single bitfield segment covering the whole
    /// range; joystick and gamepad buttons run the preset scan once
    /// per usage in `[min, max)`.
    fn emit_bitfield_segments(
        &mut self,
        report: ReportIdx,
        st: &mut ParseState,
        presets: &[Preset],
        matched: &mut u128,
        usage_min: u32,
        usage_max: u32,
    ) -> Result<()> {
        if st.app_usage_page != hut::page::GENERIC_DESKTOP {
            return Ok(());
        }
        let start_bit = st.start_bit;
        if st.app_usage == generic_desktop::KEYBOARD {
            if st.globals.usage_page == hut::page::KEYBOARD {
                // One bit per key, usually the modifier byte.
                let segment = self.create_segment(report, st, start_bit)?;
                let segment = self.arena.segment_mut(segment);
                segment.channel = OutputChannel::Keyboard;
                segment.control = usage_min as u8;
                segment.kind = InputKind::Bitfield;
            }
        } else if st.app_usage == generic_desktop::MOUSE {
            if st.globals.usage_page == hut::page::BUTTON {
                // One bit per mouse button.
                let segment = self.create_segment(report, st, start_bit)?;
                let segment = self.arena.segment_mut(segment);
                segment.channel = OutputChannel::Mouse;
                segment.control = usage_min as u8;
                segment.kind = InputKind::Bitfield;
            }
        } else if st.app_usage == generic_desktop::JOYSTICK
            || st.app_usage == generic_desktop::GAMEPAD
        {
            let mut start_bit = start_bit;
            for usage in usage_min..usage_max {
                st.locals.usage = usage;
                self.scan_presets(report, st, presets, start_bit, matched)?;
                start_bit = start_bit.wrapping_add(st.globals.report_size as u16);
            }
        }
        Ok(())
    }

    /// Array field: scancode slots of a keyboard report. Anything
    /// else in array form is not mapped.
    fn emit_array_segments(&mut self, report: ReportIdx, st: &ParseState) -> Result<()> {
        if st.app_usage_page == hut::page::GENERIC_DESKTOP
            && st.app_usage == generic_desktop::KEYBOARD
            && st.globals.usage_page == hut::page::KEYBOARD
        {
            let mut start_bit = st.start_bit;
            for _ in 0..st.globals.report_count {
                let segment = self.create_segment(report, st, start_bit)?;
                let segment = self.arena.segment_mut(segment);
                segment.channel = OutputChannel::Keyboard;
                segment.kind = InputKind::Array;
                start_bit = start_bit.wrapping_add(st.globals.report_size as u16);
            }
        }
        Ok(())
    }

    /// Walk the preset table for the current usage; every match gets
    /// its own segment.
    fn scan_presets(
        &mut self,
        report: ReportIdx,
        st: &ParseState,
        presets: &[Preset],
        start_bit: u16,
        matched: &mut u128,
    ) -> Result<()> {
        for (i, preset) in presets
            .iter()
            .take_while(|p| p.kind != InputKind::None)
            .enumerate()
        {
            if preset.usage_page == st.globals.usage_page
                && preset.usage == st.locals.usage
                && preset.pad == st.joy_index
            {
                let segment = self.create_segment(report, st, start_bit)?;
                let segment = self.arena.segment_mut(segment);
                segment.channel = preset.channel;
                segment.control = preset.control;
                segment.kind = preset.kind;
                if i < 128 {
                    *matched |= 1u128 << i;
                }
            }
        }
        Ok(())
    }

    /// Allocate a segment, prepend it to the report's list and copy
    /// the current global field layout into it.
    fn create_segment(
        &mut self,
        report: ReportIdx,
        st: &ParseState,
        start_bit: u16,
    ) -> Result<SegmentIdx> {
        if st.globals.report_size > 16 {
            log::warn!(
                "{} bit field narrowed to the 16 bit segment range",
                st.globals.report_size
            );
        }
        let segment = self
            .arena
            .alloc_segment(Segment {
                start_bit,
                report_size: st.globals.report_size,
                report_count: st.globals.report_count,
                logical_minimum: st.globals.logical_minimum as i16,
                logical_maximum: st.globals.logical_maximum as u16,
                channel: OutputChannel::Keyboard,
                control: 0,
                kind: InputKind::None,
                next: self.arena.report(report).segments,
            })
            .ok_or(Error::ArenaFull)?;
        self.arena.report_mut(report).segments = Some(segment);
        Ok(segment)
    }

    fn find_report(&self, id: u8) -> Option<ReportIdx> {
        let mut cursor = self.reports_head;
        while let Some(idx) = cursor {
            let report = self.arena.report(idx);
            if report.report_id == id {
                return Some(idx);
            }
            cursor = report.next;
        }
        None
    }

    /// Decode one input report and dispatch events into `sinks`.
    ///
    /// If the descriptor declared report ids, byte 0 selects the
    /// report layout. Failures after some segments were processed do
    /// not retract events already delivered.
    pub fn parse_report(&mut self, bytes: &[u8], sinks: &mut EventSinks<'_>) -> Result<()> {
        let report = if self.uses_report_ids {
            let id = *bytes.first().ok_or(Error::ReportTooShort { len: 0, bits: 8 })?;
            self.find_report(id).ok_or(Error::UnknownReportId(id))?
        } else {
            self.reports_head.ok_or(Error::NoReports)?
        };

        let bits = self.arena.report(report).length;
        ensure!(
            bytes.len() >= (bits as usize).div_ceil(8),
            Error::ReportTooShort {
                len: bytes.len(),
                bits
            }
        );

        let mut cursor = self.arena.report(report).segments;
        while let Some(idx) = cursor {
            let segment = *self.arena.segment(idx);
            cursor = segment.next;
            self.process_segment(&segment, report, bytes, sinks)?;
        }

        if let Some(keyboard) = sinks.keyboard.as_mut() {
            self.arena
                .report_mut(report)
                .keyboard
                .latch(|code, pressed| keyboard(code, pressed));
        }
        if let Some(mouse) = sinks.mouse.as_mut() {
            if self.mouse.changed {
                mouse(self.mouse.dx, self.mouse.dy, self.mouse.dz, self.mouse.buttons);
                self.mouse = MouseState::default();
            }
        }
        Ok(())
    }

    fn process_segment(
        &mut self,
        segment: &Segment,
        report: ReportIdx,
        bytes: &[u8],
        sinks: &mut EventSinks<'_>,
    ) -> Result<()> {
        let bits = self.arena.report(report).length;

        if segment.kind == InputKind::None {
            return Ok(());
        }

        if segment.kind == InputKind::Bitfield {
            let end_bit = segment.start_bit.wrapping_add(segment.report_count as u16);
            ensure!(
                end_bit >= segment.start_bit && end_bit <= bits,
                Error::SegmentOutOfRange {
                    start_bit: segment.start_bit,
                    bits
                }
            );
            let mut control = segment.control;
            for bit in segment.start_bit..end_bit {
                let pressed = bytes[bit as usize >> 3] >> (bit & 0x07) & 0x01 != 0;
                match segment.channel {
                    OutputChannel::Keyboard => {
                        if pressed {
                            self.arena.report_mut(report).keyboard.set_key(control);
                        }
                    }
                    OutputChannel::Mouse => {
                        if let MOUSE_BUTTON1..=MOUSE_BUTTON5 = control {
                            self.mouse.set_button(control - MOUSE_BUTTON1, pressed);
                        }
                    }
                    OutputChannel::Gamepad => {}
                }
                control = control.wrapping_add(1);
            }
            return Ok(());
        }

        let end_bit = segment.start_bit.wrapping_add(segment.report_size as u16);
        ensure!(
            end_bit >= segment.start_bit && end_bit <= bits,
            Error::SegmentOutOfRange {
                start_bit: segment.start_bit,
                bits
            }
        );

        // The field may sit across any byte alignment.
        let mut value = extract_bits(bytes, segment.start_bit, segment.report_size);
        let signed = segment.logical_minimum < 0;
        if signed {
            value = sign_extend(value, segment.report_size);
        }

        let triggered = match segment.kind {
            InputKind::ThresholdAbove(threshold) => {
                normalize_to_u8(value, signed, segment.logical_minimum, segment.logical_maximum)
                    > threshold
            }
            InputKind::ThresholdBelow(threshold) => {
                normalize_to_u8(value, signed, segment.logical_minimum, segment.logical_maximum)
                    < threshold
            }
            InputKind::Equal(reference) => value == reference as u32,
            _ => false,
        };

        if triggered {
            match segment.channel {
                OutputChannel::Keyboard => {
                    self.arena.report_mut(report).keyboard.set_key(segment.control);
                }
                OutputChannel::Gamepad => {
                    if let Some(gamepad) = sinks.gamepad.as_mut() {
                        gamepad(segment.control as u32, 1);
                    }
                }
                OutputChannel::Mouse => {}
            }
        } else if let InputKind::Axis(target) = segment.kind {
            if segment.channel == OutputChannel::Gamepad {
                let converted = convert_range(
                    value,
                    segment.logical_minimum,
                    segment.logical_maximum,
                    target,
                );
                if let Some(gamepad) = sinks.gamepad.as_mut() {
                    gamepad(segment.control as u32, converted);
                }
            }
        } else if segment.kind == InputKind::Scale {
            if segment.channel == OutputChannel::Mouse {
                match segment.control {
                    MOUSE_X => self.mouse.movement(value as i32, 0, 0),
                    MOUSE_Y => self.mouse.movement(0, value as i32, 0),
                    MOUSE_WHEEL => self.mouse.movement(0, 0, value as i32),
                    _ => {}
                }
            }
        } else if segment.kind == InputKind::Array {
            if segment.channel == OutputChannel::Keyboard && value != 0 {
                self.arena.report_mut(report).keyboard.set_key(value as u8);
            }
        }
        Ok(())
    }
}

fn warn_unmatched_presets(presets: &[Preset], matched: u128) {
    for (i, preset) in presets
        .iter()
        .take_while(|p| p.kind != InputKind::None)
        .enumerate()
        .take(128)
    {
        if matched & (1u128 << i) == 0 {
            log::warn!(
                "preset {i} (page {:#x}, usage {:#x}) matched no descriptor field",
                preset.usage_page,
                preset.usage
            );
        }
    }
}

/// Iterator over parsed [`Report`]s, see [`HidMapper::reports`].
#[derive(Debug)]
pub struct Reports<'a> {
    arena: &'a Arena,
    cursor: Option<ReportIdx>,
}

impl<'a> Iterator for Reports<'a> {
    type Item = &'a Report;

    fn next(&mut self) -> Option<&'a Report> {
        let idx = self.cursor?;
        let report = self.arena.report(idx);
        self.cursor = report.next;
        Some(report)
    }
}

/// Iterator over a report's [`Segment`]s, see [`HidMapper::segments`].
#[derive(Debug)]
pub struct Segments<'a> {
    arena: &'a Arena,
    cursor: Option<SegmentIdx>,
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a Segment;

    fn next(&mut self) -> Option<&'a Segment> {
        let idx = self.cursor?;
        let segment = self.arena.segment(idx);
        self.cursor = segment.next;
        Some(segment)
    }
}

/// Extract `nbits` (at most 32) starting at `start_bit`, LSB first.
/// Fields are packed bit-contiguous with no alignment padding.
fn extract_bits(bytes: &[u8], start_bit: u16, nbits: u8) -> u32 {
    let mut value = 0u32;
    for i in 0..nbits.min(32) as u16 {
        let position = start_bit + i;
        let bit = bytes[position as usize >> 3] >> (position & 0x07) & 0x01;
        value |= (bit as u32) << i;
    }
    value
}

/// Sign-extend a field value sitting in the low `nbits` of the
/// accumulator [`extract_bits`] filled: when the field's top bit is
/// set, the bits above it become ones.
fn sign_extend(value: u32, nbits: u8) -> u32 {
    if nbits == 0 || nbits >= 32 {
        return value;
    }
    if value & (1 << (nbits - 1)) != 0 {
        value | !0u32 << nbits
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extend_small_fields() {
        assert_eq!(sign_extend(5, 3) as i32, -3);
        assert_eq!(sign_extend(5, 4), 5);
        assert_eq!(sign_extend(0, 1), 0);
        assert_eq!(sign_extend(1, 1) as i32, -1);
        assert_eq!(sign_extend(0xff, 8) as i32, -1);
        assert_eq!(sign_extend(0x7f, 8), 0x7f);
        assert_eq!(sign_extend(0xffff, 16) as i32, -1);
        assert_eq!(sign_extend(0xffff_ffff, 32) as i32, -1);
        assert_eq!(sign_extend(0x1234, 0), 0x1234);
    }

    #[test]
    fn extract() {
        let bytes: [u8; 4] = [0b1100_1010, 0b1011_1001, 0b1001_0110, 0b0001_0101];

        assert_eq!(0, extract_bits(&bytes, 0, 1));
        assert_eq!(2, extract_bits(&bytes, 0, 2));
        assert_eq!(10, extract_bits(&bytes, 0, 4));
        assert_eq!(0b1001_1100, extract_bits(&bytes, 4, 8));
        assert_eq!(0b0110_1011_1001_1100, extract_bits(&bytes, 4, 16));
        assert_eq!(0b1_0110_1011_1001_110, extract_bits(&bytes, 5, 16));
        assert_eq!(0b1100_1010, extract_bits(&bytes, 0, 8));
    }

    #[test]
    fn keyboard_latch_fires_edges_only() {
        let mut state = KeyboardState::default();
        let mut events: Vec<(u8, bool)> = Vec::new();

        state.set_key(0x04);
        state.set_key(0xE0);
        state.latch(|code, pressed| events.push((code, pressed)));
        assert_eq!(events, vec![(0x04, true), (0xE0, true)]);

        // both keys still held
        events.clear();
        state.set_key(0x04);
        state.set_key(0xE0);
        state.latch(|code, pressed| events.push((code, pressed)));
        assert!(events.is_empty());

        // one released
        events.clear();
        state.set_key(0x04);
        state.latch(|code, pressed| events.push((code, pressed)));
        assert_eq!(events, vec![(0xE0, false)]);
    }

    #[test]
    fn empty_descriptor_yields_no_reports() {
        let mut mapper = HidMapper::new();
        mapper.parse_descriptor(&[], &[]).unwrap();
        assert_eq!(mapper.reports().count(), 0);
        assert!(!mapper.uses_report_ids());
    }

    #[test]
    fn oversized_descriptor_exhausts_the_arena() {
        // A keyboard input array with 255 slots, twice: more segments
        // than the arena holds.
        let descriptor = [
            0x05, 0x01, // Usage Page (Generic Desktop)
            0x09, 0x06, // Usage (Keyboard)
            0xA1, 0x01, // Collection (Application)
            0x05, 0x07, //   Usage Page (Keyboard)
            0x15, 0x00, //   Logical Minimum (0)
            0x25, 0x65, //   Logical Maximum (101)
            0x75, 0x08, //   Report Size (8)
            0x95, 0xFF, //   Report Count (255)
            0x81, 0x00, //   Input (Data, Array)
            0x81, 0x00, //   Input (Data, Array)
            0xC0, // End Collection
        ];
        let mut mapper = HidMapper::new();
        assert!(matches!(
            mapper.parse_descriptor(&descriptor, &[]),
            Err(Error::ArenaFull)
        ));

        // the arena is reset on the next parse
        mapper.parse_descriptor(&[0x05, 0x01], &[]).unwrap();
    }

    #[test]
    fn truncated_descriptor_fails() {
        let mut mapper = HidMapper::new();
        assert!(matches!(
            mapper.parse_descriptor(&[0x05, 0x01, 0x26, 0xFF], &[]),
            Err(Error::InvalidData { offset: 2, .. })
        ));
    }

    #[test]
    fn long_item_descriptor_fails() {
        let mut mapper = HidMapper::new();
        assert!(matches!(
            mapper.parse_descriptor(&[0xFE, 0x01, 0x42, 0x00], &[]),
            Err(Error::LongItem { offset: 0 })
        ));
    }

    #[test]
    fn report_without_descriptor_fails() {
        let mut mapper = HidMapper::new();
        assert!(matches!(
            mapper.parse_report(&[0x00], &mut EventSinks::default()),
            Err(Error::NoReports)
        ));
    }
}
