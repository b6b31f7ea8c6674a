use crate::ram::Ram;
use crate::Result;

/// One contiguous run of program bytes from a `.yo` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub address: u64,
    pub bytes: Vec<u8>,
}

/// Parse `.yo` object text. A program-bearing line has the shape
/// `ADDR: HEX_BLOB | comment`; the pipe is searched after the colon. Lines
/// missing either delimiter, with an empty payload, or with an unparseable
/// address are skipped silently.
pub fn parse_program(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();

    for line in text.lines() {
        let Some(colon) = line.find(':') else {
            continue;
        };
        let Some(pipe) = line[colon..].find('|').map(|rel| colon + rel) else {
            continue;
        };

        let bytes = parse_hex_blob(&line[colon + 1..pipe]);
        if bytes.is_empty() {
            continue;
        }
        let Some(address) = parse_address(&line[..colon]) else {
            continue;
        };

        segments.push(Segment { address, bytes });
    }

    segments
}

/// Load every segment into ram. Overflowing segments fail loudly.
pub fn load_segments(segments: &[Segment], ram: &mut Ram) -> Result<()> {
    for segment in segments {
        ram.load_bytes(segment.address, &segment.bytes)?;
    }
    Ok(())
}

pub fn load_program(text: &str, ram: &mut Ram) -> Result<()> {
    load_segments(&parse_program(text), ram)
}

/// Highest byte address any segment touches, plus one. Used by the batch
/// driver to size its memory arena.
pub fn required_memory(segments: &[Segment]) -> u64 {
    segments
        .iter()
        .map(|segment| segment.address + segment.bytes.len() as u64)
        .max()
        .unwrap_or(0)
}

/// Everything that is not a hex digit is dropped; the remaining digits are
/// consumed in pairs left-to-right, an odd trailing digit is ignored.
fn parse_hex_blob(blob: &str) -> Vec<u8> {
    let digits: Vec<u32> = blob.chars().filter_map(|c| c.to_digit(16)).collect();
    digits
        .chunks_exact(2)
        .map(|pair| ((pair[0] << 4) | pair[1]) as u8)
        .collect()
}

fn parse_address(token: &str) -> Option<u64> {
    let cleaned: String = token.chars().filter(|c| !c.is_whitespace()).collect();
    let numeric = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .unwrap_or(&cleaned);
    if numeric.is_empty() {
        return None;
    }
    u64::from_str_radix(numeric, 16).ok()
}
