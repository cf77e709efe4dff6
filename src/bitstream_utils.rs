// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Helpers to turn container samples into the Annex-B elementary stream the hardware parses.

use std::io::Cursor;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;

use byteorder::BigEndian;
use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use bytes::BufMut;
use thiserror::Error;

use crate::EncodedFormat;

pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("codec configuration record is truncated")]
    TruncatedRecord,
    #[error("unsupported codec configuration record version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid NAL length size {0}")]
    InvalidLengthSize(u8),
    #[error("NAL unit of {len} bytes overruns the sample ({remaining} bytes left)")]
    NalOverrun { len: usize, remaining: usize },
    #[error("codec {0:?} does not use length-prefixed NAL units")]
    UnsupportedCodec(EncodedFormat),
}

/// Whether `data` starts with an Annex-B start code.
pub fn is_annexb(data: &[u8]) -> bool {
    data.starts_with(&[0x00, 0x00, 0x01]) || data.starts_with(&START_CODE)
}

/// Rewrites length-prefixed (ISO/IEC 14496-15) samples into Annex-B, using the NAL length size
/// and parameter sets of an `avcC` or `hvcC` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvccConverter {
    nal_length_size: usize,
    /// Parameter sets from the configuration record, already in Annex-B form.
    parameter_sets: Vec<u8>,
}

impl AvccConverter {
    /// Builds a converter for `codec` from its configuration record.
    pub fn new(codec: EncodedFormat, extradata: &[u8]) -> Result<Self, ConvertError> {
        match codec {
            EncodedFormat::H264 => Self::from_avcc(extradata),
            EncodedFormat::H265 => Self::from_hvcc(extradata),
            _ => Err(ConvertError::UnsupportedCodec(codec)),
        }
    }

    /// Parses an AVCDecoderConfigurationRecord.
    pub fn from_avcc(extradata: &[u8]) -> Result<Self, ConvertError> {
        let mut cursor = Cursor::new(extradata);
        let version = read_u8(&mut cursor)?;
        if version != 1 {
            return Err(ConvertError::UnsupportedVersion(version));
        }
        // profile, compatibility and level.
        skip(&mut cursor, 3)?;
        let nal_length_size = nal_length_size(read_u8(&mut cursor)?)?;

        let mut parameter_sets = Vec::new();
        let num_sps = read_u8(&mut cursor)? & 0x1f;
        copy_parameter_sets(&mut cursor, num_sps as usize, &mut parameter_sets)?;
        let num_pps = read_u8(&mut cursor)?;
        copy_parameter_sets(&mut cursor, num_pps as usize, &mut parameter_sets)?;

        Ok(Self {
            nal_length_size,
            parameter_sets,
        })
    }

    /// Parses an HEVCDecoderConfigurationRecord.
    pub fn from_hvcc(extradata: &[u8]) -> Result<Self, ConvertError> {
        let mut cursor = Cursor::new(extradata);
        let version = read_u8(&mut cursor)?;
        // Some muxers wrote 0 before the record was finalized.
        if version > 1 {
            return Err(ConvertError::UnsupportedVersion(version));
        }
        skip(&mut cursor, 20)?;
        let nal_length_size = nal_length_size(read_u8(&mut cursor)?)?;

        let mut parameter_sets = Vec::new();
        let num_arrays = read_u8(&mut cursor)?;
        for _ in 0..num_arrays {
            // array_completeness, reserved and NAL unit type.
            skip(&mut cursor, 1)?;
            let num_nalus = read_u16(&mut cursor)?;
            copy_parameter_sets(&mut cursor, num_nalus as usize, &mut parameter_sets)?;
        }

        Ok(Self {
            nal_length_size,
            parameter_sets,
        })
    }

    pub fn nal_length_size(&self) -> usize {
        self.nal_length_size
    }

    /// Parameter sets of the record, each preceded by a start code.
    pub fn parameter_sets(&self) -> &[u8] {
        &self.parameter_sets
    }

    /// Appends the Annex-B form of `sample` to `out`.
    pub fn convert_into(&self, sample: &[u8], out: &mut Vec<u8>) -> Result<(), ConvertError> {
        let mut pos = 0;
        while pos < sample.len() {
            let remaining = sample.len() - pos;
            if remaining < self.nal_length_size {
                return Err(ConvertError::NalOverrun {
                    len: self.nal_length_size,
                    remaining,
                });
            }

            let len = sample[pos..pos + self.nal_length_size]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | *b as usize);
            pos += self.nal_length_size;

            let remaining = sample.len() - pos;
            if len > remaining {
                return Err(ConvertError::NalOverrun { len, remaining });
            }

            out.put_slice(&START_CODE);
            out.put_slice(&sample[pos..pos + len]);
            pos += len;
        }

        Ok(())
    }

    pub fn convert(&self, sample: &[u8]) -> Result<Vec<u8>, ConvertError> {
        let mut out = Vec::with_capacity(sample.len() + 16);
        self.convert_into(sample, &mut out)?;
        Ok(out)
    }
}

fn nal_length_size(byte: u8) -> Result<usize, ConvertError> {
    match (byte & 0x3) + 1 {
        3 => Err(ConvertError::InvalidLengthSize(3)),
        n => Ok(n as usize),
    }
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, ConvertError> {
    cursor
        .read_u8()
        .map_err(|_| ConvertError::TruncatedRecord)
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, ConvertError> {
    cursor
        .read_u16::<BigEndian>()
        .map_err(|_| ConvertError::TruncatedRecord)
}

fn skip(cursor: &mut Cursor<&[u8]>, count: u64) -> Result<(), ConvertError> {
    let pos = cursor.position() + count;
    if pos > cursor.get_ref().len() as u64 {
        return Err(ConvertError::TruncatedRecord);
    }
    cursor.set_position(pos);
    Ok(())
}

fn copy_parameter_sets(
    cursor: &mut Cursor<&[u8]>,
    count: usize,
    out: &mut Vec<u8>,
) -> Result<(), ConvertError> {
    for _ in 0..count {
        let len = read_u16(cursor)? as usize;
        let start = cursor.position() as usize;
        let nalu = cursor
            .get_ref()
            .get(start..start + len)
            .ok_or(ConvertError::TruncatedRecord)?;
        out.put_slice(&START_CODE);
        out.put_slice(nalu);
        cursor.set_position((start + len) as u64);
    }

    Ok(())
}

/// Iterator over the access units of an Annex-B H.264 or HEVC stream.
///
/// Non-VCL NAL units are gathered with the VCL unit that follows them, each VCL NAL unit closes
/// an access unit. Pictures coded as several slices thus come out one slice at a time, which the
/// hardware parser accepts as well.
pub struct AccessUnitIterator<'a> {
    data: &'a [u8],
    pos: usize,
    codec: EncodedFormat,
}

impl<'a> AccessUnitIterator<'a> {
    pub fn new(data: &'a [u8], codec: EncodedFormat) -> Self {
        Self {
            data,
            pos: 0,
            codec,
        }
    }

    fn find_start_code(&self, from: usize) -> Option<usize> {
        self.data
            .get(from..)?
            .windows(3)
            .position(|window| window == [0x00, 0x00, 0x01])
            .map(|offset| from + offset)
    }

    fn is_vcl(&self, header: u8) -> bool {
        match self.codec {
            EncodedFormat::H265 => (header >> 1) & 0x3f < 32,
            _ => matches!(header & 0x1f, 1..=5),
        }
    }
}

impl<'a> Iterator for AccessUnitIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let mut cursor = self.find_start_code(self.pos)?;
        let start = if cursor > self.pos && self.data[cursor - 1] == 0 {
            cursor - 1
        } else {
            cursor
        };
        loop {
            let header = *self.data.get(cursor + 3)?;
            let next = self.find_start_code(cursor + 3);
            if self.is_vcl(header) || next.is_none() {
                let end = match next {
                    // Leave the zero_byte of a four byte start code to the next unit.
                    Some(n) if n > 0 && self.data[n - 1] == 0 => n - 1,
                    Some(n) => n,
                    None => self.data.len(),
                };
                self.pos = end;
                return Some(&self.data[start..end]);
            }
            cursor = next?;
        }
    }
}

/// Iterator over IVF packets.
pub struct IvfIterator<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> IvfIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut cursor = Cursor::new(data);

        // Skip the IVF header entirely.
        cursor.set_position(32);

        Self { cursor }
    }
}

impl<'a> Iterator for IvfIterator<'a> {
    /// Packet payload with its timestamp.
    type Item = (&'a [u8], u64);

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.cursor.read_u32::<LittleEndian>().ok()? as usize;
        let timestamp = self.cursor.read_u64::<LittleEndian>().ok()?;

        let start = self.cursor.position() as usize;
        let end = start.checked_add(len)?;
        let packet = self.cursor.get_ref().get(start..end)?;
        self.cursor.seek(SeekFrom::Start(end as u64)).ok()?;

        Some((packet, timestamp))
    }
}

/// IVF file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfFileHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub header_size: u16,
    pub codec: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub framerate: u32,
    pub timescale: u32,
    pub frame_count: u32,
    pub unused: u32,
}

impl Default for IvfFileHeader {
    fn default() -> Self {
        Self {
            magic: Self::MAGIC,
            version: 0,
            header_size: 32,
            codec: Self::CODEC_VP9,
            width: 320,
            height: 240,
            framerate: 1,
            timescale: 1000,
            frame_count: 1,
            unused: Default::default(),
        }
    }
}

impl IvfFileHeader {
    pub const MAGIC: [u8; 4] = *b"DKIF";
    pub const CODEC_VP9: [u8; 4] = *b"VP90";
    pub const CODEC_AV1: [u8; 4] = *b"AV01";

    /// Reads the header at the start of an IVF file.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).ok()?;
        if magic != Self::MAGIC {
            return None;
        }
        let version = cursor.read_u16::<LittleEndian>().ok()?;
        let header_size = cursor.read_u16::<LittleEndian>().ok()?;
        let mut codec = [0u8; 4];
        cursor.read_exact(&mut codec).ok()?;

        Some(Self {
            magic,
            version,
            header_size,
            codec,
            width: cursor.read_u16::<LittleEndian>().ok()?,
            height: cursor.read_u16::<LittleEndian>().ok()?,
            framerate: cursor.read_u32::<LittleEndian>().ok()?,
            timescale: cursor.read_u32::<LittleEndian>().ok()?,
            frame_count: cursor.read_u32::<LittleEndian>().ok()?,
            unused: cursor.read_u32::<LittleEndian>().ok()?,
        })
    }

    /// Compressed format of the packets, if the hardware knows it.
    pub fn encoded_format(&self) -> Option<EncodedFormat> {
        match self.codec {
            Self::CODEC_VP9 => Some(EncodedFormat::VP9),
            Self::CODEC_AV1 => Some(EncodedFormat::AV1),
            _ => None,
        }
    }

    /// Writes header into writer
    pub fn write_into(&self, writer: &mut impl std::io::Write) -> std::io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.header_size.to_le_bytes())?;
        writer.write_all(&self.codec)?;
        writer.write_all(&self.width.to_le_bytes())?;
        writer.write_all(&self.height.to_le_bytes())?;
        writer.write_all(&self.framerate.to_le_bytes())?;
        writer.write_all(&self.timescale.to_le_bytes())?;
        writer.write_all(&self.frame_count.to_le_bytes())?;
        writer.write_all(&self.unused.to_le_bytes())?;

        Ok(())
    }
}

/// IVF frame header.
pub struct IvfFrameHeader {
    pub frame_size: u32,
    pub timestamp: u64,
}

impl IvfFrameHeader {
    /// Writes header into writer
    pub fn write_into(&self, writer: &mut impl std::io::Write) -> std::io::Result<()> {
        writer.write_all(&self.frame_size.to_le_bytes())?;
        writer.write_all(&self.timestamp.to_le_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // avcC with one SPS (67 42 00 1e) and one PPS (68 ce 3c 80), 4 byte lengths.
    const AVCC: [u8; 19] = [
        0x01, 0x42, 0x00, 0x1e, 0xff, 0xe1, 0x00, 0x04, 0x67, 0x42, 0x00, 0x1e, 0x01, 0x00, 0x04,
        0x68, 0xce, 0x3c, 0x80,
    ];

    #[test]
    fn avcc_parameter_sets() {
        let converter = AvccConverter::from_avcc(&AVCC).unwrap();
        assert_eq!(converter.nal_length_size(), 4);
        assert_eq!(
            converter.parameter_sets(),
            &[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e, 0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80]
        );
    }

    #[test]
    fn avcc_sample_to_annexb() {
        let converter = AvccConverter::from_avcc(&AVCC).unwrap();
        let sample = [0, 0, 0, 2, 0x65, 0x88, 0, 0, 0, 1, 0x06];
        assert_eq!(
            converter.convert(&sample).unwrap(),
            vec![0, 0, 0, 1, 0x65, 0x88, 0, 0, 0, 1, 0x06]
        );

        let truncated = [0, 0, 0, 9, 0x65];
        assert_eq!(
            converter.convert(&truncated),
            Err(ConvertError::NalOverrun {
                len: 9,
                remaining: 1
            })
        );
    }

    #[test]
    fn avcc_rejects_bad_records() {
        assert_eq!(
            AvccConverter::from_avcc(&AVCC[..10]),
            Err(ConvertError::TruncatedRecord)
        );
        let mut bad_version = AVCC;
        bad_version[0] = 2;
        assert_eq!(
            AvccConverter::from_avcc(&bad_version),
            Err(ConvertError::UnsupportedVersion(2))
        );
        let mut bad_length = AVCC;
        bad_length[4] = 0xfe;
        assert_eq!(
            AvccConverter::from_avcc(&bad_length),
            Err(ConvertError::InvalidLengthSize(3))
        );
    }

    #[test]
    fn hvcc_parameter_sets() {
        let mut hvcc = vec![0x01];
        hvcc.extend_from_slice(&[0u8; 20]);
        // 2 byte lengths, then one array holding a single VPS.
        hvcc.extend_from_slice(&[0xf1, 0x01, 0xa0, 0x00, 0x01, 0x00, 0x03, 0x40, 0x01, 0x0c]);

        let converter = AvccConverter::new(EncodedFormat::H265, &hvcc).unwrap();
        assert_eq!(converter.nal_length_size(), 2);
        assert_eq!(converter.parameter_sets(), &[0, 0, 0, 1, 0x40, 0x01, 0x0c]);
        assert_eq!(
            converter.convert(&[0x00, 0x02, 0x26, 0x01]).unwrap(),
            vec![0, 0, 0, 1, 0x26, 0x01]
        );
    }

    #[test]
    fn converter_only_for_nal_codecs() {
        assert_eq!(
            AvccConverter::new(EncodedFormat::VP9, &AVCC),
            Err(ConvertError::UnsupportedCodec(EncodedFormat::VP9))
        );
    }

    #[test]
    fn annexb_access_units() {
        let stream = [
            0, 0, 0, 1, 0x67, 0xaa, // SPS
            0, 0, 0, 1, 0x68, 0xbb, // PPS
            0, 0, 1, 0x65, 0xcc, // IDR slice
            0, 0, 0, 1, 0x41, 0xdd, // non-IDR slice
        ];
        assert!(is_annexb(&stream));

        let units: Vec<_> = AccessUnitIterator::new(&stream, EncodedFormat::H264).collect();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], &stream[0..17]);
        assert_eq!(units[1], &stream[17..]);
    }

    #[test]
    fn ivf_header_and_packets() {
        let header = IvfFileHeader {
            codec: IvfFileHeader::CODEC_VP9,
            width: 1920,
            height: 800,
            framerate: 24,
            timescale: 1,
            frame_count: 2,
            ..Default::default()
        };

        let mut file = Vec::new();
        header.write_into(&mut file).unwrap();
        assert_eq!(file.len(), 32);
        for (timestamp, payload) in [[0xaau8, 0xbb], [0xcc, 0xdd]].iter().enumerate() {
            IvfFrameHeader {
                frame_size: payload.len() as u32,
                timestamp: timestamp as u64,
            }
            .write_into(&mut file)
            .unwrap();
            file.extend_from_slice(payload);
        }

        assert_eq!(IvfFileHeader::parse(&file), Some(header));
        let packets: Vec<_> = IvfIterator::new(&file).collect();
        assert_eq!(
            packets,
            vec![(&[0xaau8, 0xbb][..], 0), (&[0xcc, 0xdd][..], 1)]
        );
    }
}
