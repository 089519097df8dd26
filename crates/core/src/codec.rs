// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Buffer snapshot codec (spec §4.6, component C6).
//!
//! Encodes a [`Frame`] — a structural capture of a terminal screen,
//! independent of the `avt`-backed emulator that produces it — into the
//! compact binary wire format consumed by the WebSocket fan-out (C7) and
//! decodes it back for property testing.

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const MAGIC: [u8; 2] = [0x54, 0x56];
pub const VERSION: u8 = 1;
const HEADER_LEN: usize = 32;

const ROW_EMPTY_RUN: u8 = 0xFE;
const ROW_CELLS: u8 = 0xFD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    fn kind(&self) -> u8 {
        match self {
            Self::Default => 0,
            Self::Indexed(_) => 1,
            Self::Rgb(..) => 2,
        }
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        match self {
            Self::Default => {}
            Self::Indexed(i) => buf.put_u8(*i),
            Self::Rgb(r, g, b) => {
                buf.put_u8(*r);
                buf.put_u8(*g);
                buf.put_u8(*b);
            }
        }
    }

    fn read(kind: u8, buf: &mut Bytes) -> Result<Self, DecodeError> {
        match kind {
            0 => Ok(Self::Default),
            1 => {
                if buf.remaining() < 1 {
                    return Err(DecodeError::Truncated);
                }
                Ok(Self::Indexed(buf.get_u8()))
            }
            2 => {
                if buf.remaining() < 3 {
                    return Err(DecodeError::Truncated);
                }
                Ok(Self::Rgb(buf.get_u8(), buf.get_u8(), buf.get_u8()))
            }
            other => Err(DecodeError::BadColorKind(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attrs {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub inverse: bool,
    pub strikethrough: bool,
    pub dim: bool,
}

impl Attrs {
    fn to_bits(self) -> u8 {
        (self.bold as u8)
            | (self.italic as u8) << 1
            | (self.underline as u8) << 2
            | (self.inverse as u8) << 3
            | (self.strikethrough as u8) << 4
            | (self.dim as u8) << 5
    }

    fn from_bits(bits: u8) -> Self {
        Self {
            bold: bits & 1 != 0,
            italic: bits & (1 << 1) != 0,
            underline: bits & (1 << 2) != 0,
            inverse: bits & (1 << 3) != 0,
            strikethrough: bits & (1 << 4) != 0,
            dim: bits & (1 << 5) != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub codepoint: u32,
    pub fg: Color,
    pub bg: Color,
    pub attrs: Attrs,
}

impl Cell {
    pub fn blank() -> Self {
        Self { codepoint: ' ' as u32, fg: Color::Default, bg: Color::Default, attrs: Attrs::default() }
    }
}

/// A row is either a run of consecutive empty rows (compressed as a count)
/// or an explicit list of cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    EmptyRun(u8),
    Cells(Vec<Cell>),
}

/// Structural capture of one screen state — the codec's input/output type.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub cols: u16,
    pub rows: u16,
    pub bell: bool,
    pub viewport_y: i32,
    pub cursor_x: i32,
    pub cursor_y: i32,
    pub grid_rows: Vec<Row>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Truncated,
    BadMagic,
    UnsupportedVersion(u8),
    BadRowTag(u8),
    BadColorKind(u8),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "frame shorter than the 32-byte header"),
            Self::BadMagic => write!(f, "bad magic bytes"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported version {v}"),
            Self::BadRowTag(t) => write!(f, "bad row tag {t:#x}"),
            Self::BadColorKind(k) => write!(f, "bad color kind {k}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Encode a frame into the wire format.
pub fn encode(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 256);

    buf.put_slice(&MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(if frame.bell { 1 } else { 0 });
    buf.put_u32_le(frame.cols as u32);
    buf.put_u32_le(frame.rows as u32);
    buf.put_i32_le(frame.viewport_y);
    buf.put_i32_le(frame.cursor_x);
    buf.put_i32_le(frame.cursor_y);
    buf.put_slice(&[0u8; 8]);
    debug_assert_eq!(buf.len(), HEADER_LEN);

    for row in &frame.grid_rows {
        match row {
            Row::EmptyRun(count) => {
                buf.put_u8(ROW_EMPTY_RUN);
                buf.put_u8(*count);
            }
            Row::Cells(cells) => {
                buf.put_u8(ROW_CELLS);
                buf.put_u16_le(cells.len() as u16);
                for cell in cells {
                    buf.put_u32_le(cell.codepoint);
                    buf.put_u8(cell.fg.kind());
                    cell.fg.write_payload(&mut buf);
                    buf.put_u8(cell.bg.kind());
                    cell.bg.write_payload(&mut buf);
                    buf.put_u8(cell.attrs.to_bits());
                }
            }
        }
    }

    buf.freeze()
}

/// Decode a wire-format frame, for property testing and diagnostics.
pub fn decode(data: &[u8]) -> Result<Frame, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::Truncated);
    }
    let mut buf = Bytes::copy_from_slice(data);

    let mut magic = [0u8; 2];
    buf.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let version = buf.get_u8();
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let flags = buf.get_u8();
    let bell = flags & 1 != 0;
    let cols = buf.get_u32_le() as u16;
    let rows = buf.get_u32_le() as u16;
    let viewport_y = buf.get_i32_le();
    let cursor_x = buf.get_i32_le();
    let cursor_y = buf.get_i32_le();
    buf.advance(8);

    let mut grid_rows = Vec::new();
    while buf.has_remaining() {
        let tag = buf.get_u8();
        match tag {
            ROW_EMPTY_RUN => {
                if !buf.has_remaining() {
                    return Err(DecodeError::Truncated);
                }
                grid_rows.push(Row::EmptyRun(buf.get_u8()));
            }
            ROW_CELLS => {
                if buf.remaining() < 2 {
                    return Err(DecodeError::Truncated);
                }
                let count = buf.get_u16_le();
                let mut cells = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    if buf.remaining() < 6 {
                        return Err(DecodeError::Truncated);
                    }
                    let codepoint = buf.get_u32_le();
                    let fg_kind = buf.get_u8();
                    let fg = Color::read(fg_kind, &mut buf)?;
                    if !buf.has_remaining() {
                        return Err(DecodeError::Truncated);
                    }
                    let bg_kind = buf.get_u8();
                    let bg = Color::read(bg_kind, &mut buf)?;
                    if !buf.has_remaining() {
                        return Err(DecodeError::Truncated);
                    }
                    let attrs = Attrs::from_bits(buf.get_u8());
                    cells.push(Cell { codepoint, fg, bg, attrs });
                }
                grid_rows.push(Row::Cells(cells));
            }
            other => return Err(DecodeError::BadRowTag(other)),
        }
    }

    Ok(Frame { cols, rows, bell, viewport_y, cursor_x, cursor_y, grid_rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_color() -> impl Strategy<Value = Color> {
        prop_oneof![
            Just(Color::Default),
            any::<u8>().prop_map(Color::Indexed),
            (any::<u8>(), any::<u8>(), any::<u8>()).prop_map(|(r, g, b)| Color::Rgb(r, g, b)),
        ]
    }

    fn arb_attrs() -> impl Strategy<Value = Attrs> {
        any::<u8>().prop_map(Attrs::from_bits)
    }

    fn arb_cell() -> impl Strategy<Value = Cell> {
        (0x20u32..0x2FFFF, arb_color(), arb_color(), arb_attrs())
            .prop_map(|(codepoint, fg, bg, attrs)| Cell { codepoint, fg, bg, attrs })
    }

    fn arb_row() -> impl Strategy<Value = Row> {
        prop_oneof![
            any::<u8>().prop_map(Row::EmptyRun),
            proptest::collection::vec(arb_cell(), 0..40).prop_map(Row::Cells),
        ]
    }

    fn arb_frame() -> impl Strategy<Value = Frame> {
        (
            any::<u16>(),
            any::<u16>(),
            any::<bool>(),
            any::<i32>(),
            any::<i32>(),
            any::<i32>(),
            proptest::collection::vec(arb_row(), 0..30),
        )
            .prop_map(|(cols, rows, bell, viewport_y, cursor_x, cursor_y, grid_rows)| Frame {
                cols,
                rows,
                bell,
                viewport_y,
                cursor_x,
                cursor_y,
                grid_rows,
            })
    }

    proptest! {
        #[test]
        fn round_trips(frame in arb_frame()) {
            let encoded = encode(&frame);
            let decoded = decode(&encoded).expect("decode should succeed for any encoded frame");
            prop_assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn header_has_correct_magic_and_version() {
        let frame = Frame {
            cols: 80,
            rows: 24,
            bell: false,
            viewport_y: 0,
            cursor_x: 0,
            cursor_y: 0,
            grid_rows: vec![],
        };
        let encoded = encode(&frame);
        assert_eq!(&encoded[0..2], &MAGIC);
        assert_eq!(encoded[2], VERSION);
        assert_eq!(encoded.len(), HEADER_LEN);
    }

    #[test]
    fn rejects_truncated_frame() {
        assert!(matches!(decode(&[0x54]), Err(DecodeError::Truncated)));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0] = 0xFF;
        assert!(matches!(decode(&bytes), Err(DecodeError::BadMagic)));
    }
}
