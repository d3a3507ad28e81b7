//! Byte-exact JDWP packet encoding and decoding.
//!
//! A [`Packet`] is a single growable buffer with one cursor shared by reads and
//! writes. Command and reply packets only differ in their header bytes; the body
//! always starts at [`HEADER_LEN`].

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{ErrorCode, JdwpError, Result};
use crate::types::{
    FieldId, FrameId, IdSizes, Location, MethodId, ObjectId, ReferenceTypeId, ThreadGroupId,
    ThreadId, FLAG_REPLY, HEADER_LEN,
};

const LENGTH_POS: usize = 0;
const ID_POS: usize = 4;
const FLAGS_POS: usize = 8;
const COMMAND_SET_POS: usize = 9;
const COMMAND_POS: usize = 10;
const ERROR_CODE_POS: usize = 9;

/// Allocates packets with the process-wide id sizes and hands out outbound
/// command packet ids.
#[derive(Debug)]
pub struct PacketFactory {
    sizes: IdSizes,
    next_id: AtomicU32,
}

impl PacketFactory {
    pub fn new(sizes: IdSizes) -> Self {
        Self {
            sizes,
            next_id: AtomicU32::new(1),
        }
    }

    pub fn id_sizes(&self) -> IdSizes {
        self.sizes
    }

    pub fn next_packet_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A headerless buffer, used for sub-payloads that are later concatenated.
    pub fn raw(&self, capacity: usize) -> Packet {
        Packet::raw(self.sizes, capacity)
    }

    pub fn reply(&self, id: u32, body: usize) -> Packet {
        let mut packet = Packet::raw(self.sizes, HEADER_LEN + body);
        packet.set_id(id);
        packet.set_flags(FLAG_REPLY);
        packet.set_error_code(ErrorCode::NONE);
        packet.offset = HEADER_LEN;
        packet.limit = HEADER_LEN;
        packet
    }

    pub fn error_reply(&self, id: u32, code: ErrorCode) -> Packet {
        let mut packet = self.reply(id, 0);
        packet.set_error_code(code);
        packet
    }

    pub fn command(&self, command_set: u8, command: u8, body: usize) -> Packet {
        let mut packet = Packet::raw(self.sizes, HEADER_LEN + body);
        packet.set_id(self.next_packet_id());
        packet.set_flags(0);
        packet.set_command_set(command_set);
        packet.set_command(command);
        packet.offset = HEADER_LEN;
        packet.limit = HEADER_LEN;
        packet
    }

    pub fn from_header(&self, header: &[u8; HEADER_LEN]) -> Packet {
        Packet::from_header(self.sizes, header)
    }

    pub fn from_header_payload(&self, header: &[u8; HEADER_LEN], payload: &[u8]) -> Packet {
        Packet::from_header_payload(self.sizes, header, payload)
    }
}

/// One JDWP message: header plus body, or a bare sub-payload.
///
/// `data.len()` is the allocated capacity. `limit` is the furthest byte that
/// holds meaningful content and bounds every read.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
    offset: usize,
    limit: usize,
    sizes: IdSizes,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("offset", &self.offset)
            .field("capacity", &self.data.len())
            .field("bytes", &self.written())
            .finish()
    }
}

impl Packet {
    pub fn raw(sizes: IdSizes, capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            offset: 0,
            limit: 0,
            sizes,
        }
    }

    /// Rebuild a body-less packet from its received header. The cursor is left at
    /// the body offset.
    pub fn from_header(sizes: IdSizes, header: &[u8; HEADER_LEN]) -> Self {
        Self {
            data: header.to_vec(),
            offset: HEADER_LEN,
            limit: HEADER_LEN,
            sizes,
        }
    }

    /// Rebuild a packet from its received header and body. The cursor is left at
    /// the start of the body.
    pub fn from_header_payload(sizes: IdSizes, header: &[u8; HEADER_LEN], payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(HEADER_LEN + payload.len());
        data.extend_from_slice(header);
        data.extend_from_slice(payload);
        let limit = data.len();
        Self {
            data,
            offset: HEADER_LEN,
            limit,
            sizes,
        }
    }

    pub fn id_sizes(&self) -> IdSizes {
        self.sizes
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn set_position(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.offset)
    }

    /// Bytes from the start of the buffer up to the cursor.
    pub fn written(&self) -> &[u8] {
        &self.data[..self.offset.min(self.data.len())]
    }

    /// Stamp the length field with the cursor position and return the wire bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.offset;
        self.set_length(len as u32);
        self.data.truncate(len);
        self.data
    }

    fn ensure_capacity(&mut self, bytes: usize) {
        let needed = self.offset + bytes;
        if needed >= self.data.len() {
            let grown = (self.data.len() * 2).max(needed);
            self.data.resize(grown, 0);
        }
    }

    fn ensure_header(&mut self) {
        if self.data.len() < HEADER_LEN {
            self.data.resize(HEADER_LEN, 0);
        }
    }

    // --- header -----------------------------------------------------------

    fn put_at(&mut self, pos: usize, bytes: &[u8]) {
        self.ensure_header();
        self.data[pos..pos + bytes.len()].copy_from_slice(bytes);
    }

    fn u32_at(&self, pos: usize) -> u32 {
        match self.data.get(pos..pos + 4) {
            Some(b) => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            None => 0,
        }
    }

    fn u8_at(&self, pos: usize) -> u8 {
        self.data.get(pos).copied().unwrap_or(0)
    }

    pub fn set_length(&mut self, length: u32) {
        self.put_at(LENGTH_POS, &length.to_be_bytes());
    }

    pub fn set_id(&mut self, id: u32) {
        self.put_at(ID_POS, &id.to_be_bytes());
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.put_at(FLAGS_POS, &[flags]);
    }

    pub fn set_command_set(&mut self, command_set: u8) {
        self.put_at(COMMAND_SET_POS, &[command_set]);
    }

    pub fn set_command(&mut self, command: u8) {
        self.put_at(COMMAND_POS, &[command]);
    }

    pub fn set_error_code(&mut self, code: ErrorCode) {
        self.put_at(ERROR_CODE_POS, &code.0.to_be_bytes());
    }

    pub fn length(&self) -> u32 {
        self.u32_at(LENGTH_POS)
    }

    pub fn id(&self) -> u32 {
        self.u32_at(ID_POS)
    }

    pub fn flags(&self) -> u8 {
        self.u8_at(FLAGS_POS)
    }

    /// Only meaningful for command packets.
    pub fn command_set(&self) -> u8 {
        self.u8_at(COMMAND_SET_POS)
    }

    /// Only meaningful for command packets.
    pub fn command(&self) -> u8 {
        self.u8_at(COMMAND_POS)
    }

    /// Only meaningful for reply packets.
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode(u16::from_be_bytes([
            self.u8_at(ERROR_CODE_POS),
            self.u8_at(ERROR_CODE_POS + 1),
        ]))
    }

    pub fn is_reply(&self) -> bool {
        self.flags() & FLAG_REPLY != 0
    }

    pub fn is_command(&self) -> bool {
        !self.is_reply()
    }

    // --- writers ----------------------------------------------------------

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.ensure_capacity(bytes.len());
        self.data[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len();
        self.limit = self.limit.max(self.offset);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Write the low `size` bytes of `id`, big-endian.
    pub fn write_id(&mut self, id: u64, size: usize) {
        let be = id.to_be_bytes();
        self.write_bytes(&be[8 - size.min(8)..]);
    }

    pub fn write_tag(&mut self, tag: u8) {
        self.write_u8(tag);
    }

    pub fn write_method_id(&mut self, id: MethodId) {
        self.write_id(id, self.sizes.method_id);
    }

    pub fn write_field_id(&mut self, id: FieldId) {
        self.write_id(id, self.sizes.field_id);
    }

    pub fn write_object_id(&mut self, id: ObjectId) {
        self.write_id(id, self.sizes.object_id);
    }

    pub fn write_tagged_object_id(&mut self, tag: u8, id: ObjectId) {
        self.write_tag(tag);
        self.write_object_id(id);
    }

    pub fn write_thread_id(&mut self, id: ThreadId) {
        self.write_id(id, self.sizes.object_id);
    }

    pub fn write_thread_group_id(&mut self, id: ThreadGroupId) {
        self.write_id(id, self.sizes.object_id);
    }

    pub fn write_reference_type_id(&mut self, id: ReferenceTypeId) {
        self.write_id(id, self.sizes.reference_type_id);
    }

    pub fn write_frame_id(&mut self, id: FrameId) {
        self.write_id(id, self.sizes.frame_id);
    }

    pub fn write_location(&mut self, location: &Location) {
        self.write_tag(location.type_tag);
        self.write_reference_type_id(location.class_id);
        self.write_method_id(location.method_id);
        self.write_u64(location.index);
    }

    /// Length-prefixed string in the protocol's modified-UTF scheme.
    pub fn write_str(&mut self, s: &str) {
        self.write_modified_utf(s.encode_utf16());
    }

    /// Length-prefixed modified-UTF encoding of `units`, stopping at the first NUL.
    pub fn write_utf(&mut self, units: &[u16]) {
        self.write_modified_utf(units.iter().copied());
    }

    fn write_modified_utf<I>(&mut self, units: I)
    where
        I: Iterator<Item = u16> + Clone,
    {
        let units = units.take_while(|&unit| unit != 0);
        let len: usize = units.clone().map(encoded_len).sum();
        self.write_u32(len as u32);
        self.ensure_capacity(len);
        for unit in units {
            match encoded_len(unit) {
                1 => self.write_u8(unit as u8),
                2 => {
                    self.write_u8(0xC0 | ((unit >> 6) & 0x1F) as u8);
                    self.write_u8(0x80 | (unit & 0x3F) as u8);
                }
                _ => {
                    self.write_u8(0xE0 | ((unit >> 12) & 0x0F) as u8);
                    self.write_u8(0x80 | ((unit >> 6) & 0x3F) as u8);
                    self.write_u8(0x80 | (unit & 0x3F) as u8);
                }
            }
        }
    }

    /// Append another packet's written bytes.
    pub fn write_packet(&mut self, other: &Packet) {
        self.write_bytes(other.written());
    }

    pub fn write_list(&mut self, list: &PacketList) {
        self.ensure_capacity(list.byte_size());
        for packet in list.iter() {
            self.write_packet(packet);
        }
    }

    // --- readers ----------------------------------------------------------

    fn require(&self, needed: usize) -> Result<()> {
        let underflow = || JdwpError::BufferUnderflow {
            needed,
            offset: self.offset,
            limit: self.limit,
        };
        let end = self.offset.checked_add(needed).ok_or_else(underflow)?;
        if end > self.limit {
            return Err(underflow());
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        self.require(len)?;
        let start = self.offset;
        self.offset += len;
        Ok(&self.data[start..start + len])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.require(1)?;
        let v = self.data[self.offset];
        self.offset += 1;
        Ok(v)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        let mut be = [0u8; 8];
        be.copy_from_slice(b);
        Ok(u64::from_be_bytes(be))
    }

    pub fn read_id(&mut self, size: usize) -> Result<u64> {
        if size == 0 || size > 8 {
            return Err(JdwpError::InvalidIdSize(size));
        }
        let b = self.read_bytes(size)?;
        let mut be = [0u8; 8];
        be[8 - size..].copy_from_slice(b);
        Ok(u64::from_be_bytes(be))
    }

    pub fn read_tag(&mut self) -> Result<u8> {
        self.read_u8()
    }

    pub fn read_method_id(&mut self) -> Result<MethodId> {
        self.read_id(self.sizes.method_id)
    }

    pub fn read_field_id(&mut self) -> Result<FieldId> {
        self.read_id(self.sizes.field_id)
    }

    pub fn read_object_id(&mut self) -> Result<ObjectId> {
        self.read_id(self.sizes.object_id)
    }

    pub fn read_thread_id(&mut self) -> Result<ThreadId> {
        self.read_id(self.sizes.object_id)
    }

    pub fn read_thread_group_id(&mut self) -> Result<ThreadGroupId> {
        self.read_id(self.sizes.object_id)
    }

    pub fn read_reference_type_id(&mut self) -> Result<ReferenceTypeId> {
        self.read_id(self.sizes.reference_type_id)
    }

    pub fn read_frame_id(&mut self) -> Result<FrameId> {
        self.read_id(self.sizes.frame_id)
    }

    pub fn read_location(&mut self) -> Result<Location> {
        Ok(Location {
            type_tag: self.read_tag()?,
            class_id: self.read_reference_type_id()?,
            method_id: self.read_method_id()?,
            index: self.read_u64()?,
        })
    }

    pub fn read_str(&mut self) -> Result<String> {
        let start = self.offset;
        let units = self.read_utf()?;
        String::from_utf16(&units)
            .map_err(|_| JdwpError::MalformedUtf { offset: start })
    }

    /// Decode a length-prefixed modified-UTF string into UTF-16 code units.
    ///
    /// Any byte sequence that does not follow the 1/2/3-byte scheme, a raw
    /// zero byte, or a sequence that runs past the declared length is rejected.
    pub fn read_utf(&mut self) -> Result<Vec<u16>> {
        let len = self.read_u32()? as usize;
        self.require(len)?;
        let end = self.offset + len;
        let mut units = Vec::with_capacity(len);
        while self.offset < end {
            let lead_at = self.offset;
            let lead = self.data[lead_at];
            self.offset += 1;
            let unit = match lead >> 4 {
                // NUL only ever appears as the two-byte form C0 80.
                0..=7 if lead != 0 => u16::from(lead),
                12 | 13 => {
                    let b2 = self.continuation_byte(end)?;
                    (u16::from(lead & 0x1F) << 6) | u16::from(b2 & 0x3F)
                }
                14 => {
                    let b2 = self.continuation_byte(end)?;
                    let b3 = self.continuation_byte(end)?;
                    (u16::from(lead & 0x0F) << 12)
                        | (u16::from(b2 & 0x3F) << 6)
                        | u16::from(b3 & 0x3F)
                }
                _ => return Err(JdwpError::MalformedUtf { offset: lead_at }),
            };
            units.push(unit);
        }
        Ok(units)
    }

    fn continuation_byte(&mut self, end: usize) -> Result<u8> {
        let at = self.offset;
        if at >= end {
            return Err(JdwpError::MalformedUtf { offset: at });
        }
        let b = self.data[at];
        if b & 0xC0 != 0x80 {
            return Err(JdwpError::MalformedUtf { offset: at });
        }
        self.offset += 1;
        Ok(b)
    }
}

fn encoded_len(unit: u16) -> usize {
    match unit {
        0x0001..=0x007F => 1,
        0x0080..=0x07FF => 2,
        _ => 3,
    }
}

/// Size of `write_utf(units)` in bytes, including the 4-byte length prefix.
pub fn utf_size(units: &[u16]) -> usize {
    4 + units
        .iter()
        .copied()
        .take_while(|&unit| unit != 0)
        .map(encoded_len)
        .sum::<usize>()
}

/// Size of `write_str(s)` in bytes, including the 4-byte length prefix.
pub fn str_size(s: &str) -> usize {
    4 + s
        .encode_utf16()
        .take_while(|&unit| unit != 0)
        .map(encoded_len)
        .sum::<usize>()
}

/// Transient batch of encoded sub-payloads.
///
/// Every push becomes the new head, so iteration (and [`Packet::write_list`])
/// yields the most recently pushed packet first.
#[derive(Debug, Default)]
pub struct PacketList {
    packets: Vec<Packet>,
}

impl PacketList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: Packet) {
        self.packets.push(packet);
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Sum of the written length of every member.
    pub fn byte_size(&self) -> usize {
        self.packets.iter().map(Packet::position).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Packet> + '_ {
        self.packets.iter().rev()
    }
}
