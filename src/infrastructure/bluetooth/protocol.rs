//! UART Peripheral Protocol
//!
//! UUIDs and message framing for the Nordic-UART-style service exposed by
//! the target peripheral.

use uuid::Uuid;

/// UART service UUID advertised by the target peripheral.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// TX characteristic UUID - where outbound messages are written.
pub const UART_TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Terminator appended to every outbound message.
pub const MESSAGE_TERMINATOR: char = ';';

/// Frame a message for the wire: append the terminator and encode as UTF-8.
///
/// Rust strings are UTF-8 by construction, so framing cannot fail.
pub fn frame_message(text: &str) -> Vec<u8> {
    let mut framed = String::with_capacity(text.len() + 1);
    framed.push_str(text);
    framed.push(MESSAGE_TERMINATOR);
    framed.into_bytes()
}
