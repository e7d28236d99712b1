//! Length-prefixed frame records on the byte streams between the guest side and the stack.

use std::io::{self, Read, Write};

use etherlink_frame::{LinkPadding, ETH_MAX_FRAME_LEN};

/// Largest record accepted on either stream.
pub(crate) const MAX_RECORD_LEN: usize = LinkPadding::LeadingPad2.read_capacity();

const _: () = assert!(MAX_RECORD_LEN >= ETH_MAX_FRAME_LEN);

pub(crate) fn write_record(writer: &mut impl Write, frame: &[u8]) -> io::Result<()> {
    if frame.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "frame exceeds queue record limit",
        ));
    }
    let mut record = Vec::with_capacity(4 + frame.len());
    record.extend_from_slice(&(frame.len() as u32).to_le_bytes());
    record.extend_from_slice(frame);
    writer.write_all(&record)
}

pub(crate) fn read_record(reader: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_RECORD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("queue record of {len} bytes"),
        ));
    }
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame)?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn records_keep_boundaries() {
        let mut stream = Vec::new();
        write_record(&mut stream, b"first").unwrap();
        write_record(&mut stream, b"").unwrap();
        write_record(&mut stream, &[7u8; ETH_MAX_FRAME_LEN]).unwrap();

        let mut reader = Cursor::new(stream);
        assert_eq!(read_record(&mut reader).unwrap(), b"first");
        assert!(read_record(&mut reader).unwrap().is_empty());
        assert_eq!(read_record(&mut reader).unwrap().len(), ETH_MAX_FRAME_LEN);
        assert_eq!(
            read_record(&mut reader).unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn oversized_length_prefix_is_invalid() {
        let mut reader = Cursor::new((MAX_RECORD_LEN as u32 + 1).to_le_bytes().to_vec());
        assert_eq!(
            read_record(&mut reader).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }
}
