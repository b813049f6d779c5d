//! Track signal source for host runs. Builds well-formed frames and
//! replays them bit by bit into the receiver, the way the signal would
//! come off the rails.

use wdog_core::receiver::BitDecoder;

/// Appends the XOR error byte to an instruction sequence.
pub fn framed(payload: &[u8]) -> Vec<u8> {
    let mut bytes = payload.to_vec();
    bytes.push(payload.iter().fold(0, |acc, b| acc ^ b));
    bytes
}

/// Broadcast reset.
pub fn reset() -> Vec<u8> {
    framed(&[0, 0])
}

/// Idle frame; keeps the signal alive without addressing anyone.
pub fn idle() -> Vec<u8> {
    framed(&[0xFF, 0])
}

/// {preamble} 0 10AAAAAA 0 1AAACDDD 0 EEEEEEEE 1
/// The three high address bits travel inverted in the second byte.
pub fn basic_accessory(address: u16, port: u8, gate: u8, activate: bool) -> Vec<u8> {
    let b0 = 0b1000_0000 | (address & 0b0011_1111) as u8;
    let high = ((address >> 6) & 0b111) as u8;
    let b1 = 0b1000_0000
        | ((!high & 0b111) << 4)
        | ((activate as u8) << 3)
        | ((port & 0b11) << 1)
        | (gate & 1);
    framed(&[b0, b1])
}

/// {preamble} 0 10AAAAAA 0 0AAA0AA1 0 000XXXXX 0 EEEEEEEE 1
pub fn extended_accessory(address: u16, aspect: u8) -> Vec<u8> {
    let b0 = 0b1000_0000 | ((address >> 2) & 0b0011_1111) as u8;
    let b1 = ((!(address >> 8) as u8 & 0b111) << 4) | ((address as u8 & 0b11) << 1) | 1;
    framed(&[b0, b1, aspect & 0b0001_1111])
}

/// 28-step speed command over a 7-bit loco address. `steps` 0 stops.
pub fn loco_speed(address: u8, steps: u8) -> Vec<u8> {
    let code = if steps == 0 { 0 } else { steps + 3 };
    let byte = 0b0110_0000 | ((code >> 1) & 0b1111) | ((code & 1) << 4);
    framed(&[address & 0x7F, byte])
}

/// Function group one over a 14-bit loco address; bits 0..3 are F1..F4.
pub fn loco_functions(address: u16, f1_f4: u8) -> Vec<u8> {
    framed(&[
        0b1100_0000 | ((address >> 8) & 0b0011_1111) as u8,
        (address & 0xFF) as u8,
        0b1000_0000 | (f1_f4 & 0b1111),
    ])
}

/// Long-form configuration write on the main, over the loco address.
pub fn pom_write(loco: u16, index: u16, data: u8) -> Vec<u8> {
    long_form(loco, 0b11, index, data)
}

/// Long-form configuration verify on the main, over the loco address.
pub fn pom_verify(loco: u16, index: u16) -> Vec<u8> {
    long_form(loco, 0b01, index, 0)
}

/// {preamble} 0 11AAAAAA 0 AAAAAAAA 0 1110CCAA 0 AAAAAAAA 0 DDDDDDDD 0 E 1
fn long_form(loco: u16, cc: u8, index: u16, data: u8) -> Vec<u8> {
    framed(&[
        0b1100_0000 | ((loco >> 8) & 0b0011_1111) as u8,
        (loco & 0xFF) as u8,
        0b1110_0000 | (cc << 2) | ((index >> 8) & 0b11) as u8,
        (index & 0xFF) as u8,
        data,
    ])
}

/// Direct-mode write on the programming track. Only understood after a
/// reset frame has opened service mode.
pub fn service_write(index: u16, data: u8) -> Vec<u8> {
    framed(&[
        0b0111_1100 | ((index >> 8) & 0b11) as u8,
        (index & 0xFF) as u8,
        data,
    ])
}

/// Direct-mode verify on the programming track.
pub fn service_verify(index: u16, data: u8) -> Vec<u8> {
    framed(&[
        0b0111_0100 | ((index >> 8) & 0b11) as u8,
        (index & 0xFF) as u8,
        data,
    ])
}

/// Replays complete frames into the receiver: preamble, a zero start bit
/// before every byte, the bytes most-significant-bit first, one trailing
/// one bit.
pub fn play(decoder: &mut BitDecoder, frames: &[Vec<u8>]) {
    for bytes in frames {
        for _ in 0..14 {
            decoder.on_sample(true);
        }
        for byte in bytes {
            decoder.on_sample(false);
            for bit in (0..8).rev() {
                decoder.on_sample(byte & (1 << bit) != 0);
            }
        }
        decoder.on_sample(true);
    }
}
