//! Annex B bitstream splitting.
//!
//! H.264 Annex B bitstreams delimit NAL units with start codes:
//! - 4-byte: `0x00 0x00 0x00 0x01`
//! - 3-byte: `0x00 0x00 0x01`

/// The start code prepended to every buffer fed to a start-code source.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Split an Annex B bitstream into NAL units, excluding start codes.
///
/// The start code length is tracked per-NAL so boundaries between
/// adjacent NALs are computed correctly when mixed 3-byte and 4-byte
/// start codes appear. Bytes before the first start code are dropped.
pub fn split_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut starts: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == START_CODE {
            starts.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            starts.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .filter_map(|(idx, &(start, _))| {
            let end = match starts.get(idx + 1) {
                Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
                None => data.len(),
            };
            (start < end).then(|| &data[start..end])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_nal_4byte_sc() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        let nals = split_nal_units(&data);
        assert_eq!(nals, vec![&[0x65, 0xAA, 0xBB][..]]);
    }

    #[test]
    fn single_nal_3byte_sc() {
        let data = [0, 0, 1, 0x67, 0x42, 0x00];
        let nals = split_nal_units(&data);
        assert_eq!(nals, vec![&[0x67, 0x42, 0x00][..]]);
    }

    #[test]
    fn mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let nals = split_nal_units(&data);
        assert_eq!(nals.len(), 2);
        assert_eq!(nals[0], &[0x67, 0x42]);
        assert_eq!(nals[1], &[0x68, 0xCE]);
    }

    #[test]
    fn leading_garbage_dropped() {
        let data = [0xFF, 0xFE, 0, 0, 0, 1, 0x41, 0x01];
        assert_eq!(split_nal_units(&data), vec![&[0x41, 0x01][..]]);
    }

    #[test]
    fn empty_and_unframed() {
        assert!(split_nal_units(&[]).is_empty());
        assert!(split_nal_units(&[0xFF, 0xFE]).is_empty());
    }
}
