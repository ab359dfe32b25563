//! CRC-16/CCITT used by the file trailer

const POLY: u16 = 0x1021;

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u16) << 8;
        let mut j = 0;
        while j < 8 {
            r = if r & 0x8000 != 0 { (r << 1) ^ POLY } else { r << 1 };
            j += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

static TABLE: [u16; 256] = build_table();

/// CRC-16/CCITT with initial value 0xFFFF and final XOR 0xFFFF
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in data {
        crc = (crc << 8) ^ TABLE[usize::from((crc >> 8) as u8 ^ b)];
    }
    crc ^ 0xFFFF
}
