// Adler32 over a decoded target window (SDCH VCD_CHECKSUM extension).
//
// The value is carried in the window header as a variable-length integer;
// it is a 32-bit *unsigned* quantity, so callers widen it to u64 before
// varint length calculations.

/// Compute the Adler32 checksum of `data`.
#[cfg(feature = "adler32")]
pub fn adler32(data: &[u8]) -> u32 {
    let mut hasher = simd_adler32::Adler32::new();
    hasher.write(data);
    hasher.finish()
}

/// Compute the Adler32 checksum of `data`.
#[cfg(not(feature = "adler32"))]
pub fn adler32(data: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + u32::from(byte)) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}
