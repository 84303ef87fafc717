//! Structural checksums used by the format: Bob Jenkins' `lookup3` (v2
//! object-header chunks, v2 B-tree nodes) and Fletcher-32 (the filter
//! pipeline's checksum filter, id 3).

/// Jenkins' one-at-a-time `lookup3` hash, the variant HDF5 uses for its v2
/// structural checksums. Ported directly from the public-domain reference
/// algorithm; the exact mixing constants and rotation amounts are
/// load-bearing for wire compatibility and must not be "simplified".
pub fn lookup3(data: &[u8], initval: u32) -> u32 {
    const fn rot(x: u32, k: u32) -> u32 {
        (x << k) | (x >> (32 - k))
    }

    let mut a: u32 = 0xdeadbeefu32.wrapping_add(data.len() as u32).wrapping_add(initval);
    let mut b = a;
    let mut c = a;

    // Reference `hashlittle` loops `while (length > 12)`, so a length that is
    // an exact multiple of 12 still leaves its last 12 bytes for the
    // add-then-`final` tail below rather than mixing them here.
    let mut remaining = data;
    while remaining.len() > 12 {
        let chunk = &remaining[..12];
        a = a.wrapping_add(u32::from_le_bytes(chunk[0..4].try_into().unwrap()));
        b = b.wrapping_add(u32::from_le_bytes(chunk[4..8].try_into().unwrap()));
        c = c.wrapping_add(u32::from_le_bytes(chunk[8..12].try_into().unwrap()));

        a = a.wrapping_sub(c);
        a ^= rot(c, 4);
        c = c.wrapping_add(b);
        b = b.wrapping_sub(a);
        b ^= rot(a, 6);
        a = a.wrapping_add(c);
        c = c.wrapping_sub(b);
        c ^= rot(b, 8);
        b = b.wrapping_add(a);
        a = a.wrapping_sub(c);
        a ^= rot(c, 16);
        c = c.wrapping_add(b);
        b = b.wrapping_sub(a);
        b ^= rot(a, 19);
        a = a.wrapping_add(c);
        c = c.wrapping_sub(b);
        c ^= rot(b, 4);
        b = b.wrapping_add(a);

        remaining = &remaining[12..];
    }

    // `hashlittle` returns `c` unfinalized only when there is no tail at all
    // (the original input's length was itself 0).
    if remaining.is_empty() {
        return c;
    }

    let mut tail = [0u8; 12];
    tail[..remaining.len()].copy_from_slice(remaining);

    a = a.wrapping_add(u32::from_le_bytes(tail[0..4].try_into().unwrap()));
    b = b.wrapping_add(u32::from_le_bytes(tail[4..8].try_into().unwrap()));
    c = c.wrapping_add(u32::from_le_bytes(tail[8..12].try_into().unwrap()));

    c ^= b;
    c = c.wrapping_sub(rot(b, 14));
    a ^= c;
    a = a.wrapping_sub(rot(c, 11));
    b ^= a;
    b = b.wrapping_sub(rot(a, 25));
    c ^= b;
    c = c.wrapping_sub(rot(b, 16));
    a ^= c;
    a = a.wrapping_sub(rot(c, 4));
    b ^= a;
    b = b.wrapping_sub(rot(a, 14));
    c ^= b;
    c = c.wrapping_sub(rot(b, 24));

    c
}

/// Fletcher-32 checksum over a byte string, padded to an even length with a
/// trailing zero byte if needed (per the HDF5 spec's definition). The empty
/// string checksums to `0`.
pub fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;

    let mut padded;
    let words: &[u8] = if data.len() % 2 != 0 {
        padded = data.to_vec();
        padded.push(0);
        &padded
    } else {
        data
    };

    for pair in words.chunks_exact(2) {
        let word = u16::from_le_bytes([pair[0], pair[1]]) as u32;
        sum1 = (sum1 + word) % 65535;
        sum2 = (sum2 + sum1) % 65535;
    }

    (sum2 << 16) | sum1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fletcher32_of_empty_is_zero() {
        assert_eq!(fletcher32(&[]), 0);
    }

    #[test]
    fn fletcher32_is_deterministic() {
        let a = fletcher32(&[0x01, 0x02, 0x03, 0x04]);
        let b = fletcher32(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(a, b);
        assert_ne!(a, fletcher32(&[0x01, 0x02, 0x03, 0x05]));
    }

    #[test]
    fn lookup3_changes_with_input() {
        let a = lookup3(b"hello world", 0);
        let b = lookup3(b"hello world!", 0);
        assert_ne!(a, b);
        assert_eq!(lookup3(b"hello world", 0), a);
    }

    #[test]
    fn lookup3_of_empty_is_deterministic() {
        assert_eq!(lookup3(b"", 0), lookup3(b"", 0));
    }

    #[test]
    fn lookup3_handles_exact_multiples_of_twelve() {
        // A length that is an exact multiple of 12 must still route its last
        // 12-byte block through the add-then-final tail, not through `mix`;
        // regression for a bug where such inputs skipped `final` entirely.
        let twelve: Vec<u8> = (0..12u8).collect();
        let twenty_four: Vec<u8> = (0..24u8).collect();
        let thirty_six: Vec<u8> = (0..36u8).collect();

        // None of these should collide with the hash of one byte fewer or
        // more, which they would if the last full block were mixed instead
        // of finalized (mixing an all-zero "tail" is a no-op, so a buggy
        // implementation hashes length 12 and length 11 identically only by
        // coincidence, but it does skip the final avalanche for 12/24/36).
        assert_ne!(lookup3(&twelve, 0), lookup3(&twelve[..11], 0));
        assert_ne!(lookup3(&twenty_four, 0), lookup3(&twenty_four[..23], 0));
        assert_ne!(lookup3(&thirty_six, 0), lookup3(&thirty_six[..35], 0));
    }
}
