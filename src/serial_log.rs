//! Fire-and-forget log channel.
//!
//! Drivers push short formatted lines into [`SERIAL_CHANNEL`]; the firmware
//! drains it to whatever output it has (defmt over RTT on the Pico). Sends
//! never block: when the channel is full the line is dropped.

use core::fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use heapless::String;

use crate::constants::buffers;

pub type LogLine = String<{ buffers::MESSAGE_BUFFER_SIZE }>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Severity {
    Info,
    Warn,
}

/// Message types that can be sent to the log output
#[derive(Clone, Debug)]
pub enum SerialMessage {
    /// Simple text message
    Text(&'static str),
    /// Formatted line, truncated to the buffer size
    Formatted(Severity, LogLine),
}

/// Global channel for sending log lines from anywhere in the code
pub static SERIAL_CHANNEL: Channel<
    CriticalSectionRawMutex,
    SerialMessage,
    { buffers::SERIAL_CHANNEL_DEPTH },
> = Channel::new();

pub fn get_serial_sender(
) -> Sender<'static, CriticalSectionRawMutex, SerialMessage, { buffers::SERIAL_CHANNEL_DEPTH }> {
    SERIAL_CHANNEL.sender()
}

pub fn get_serial_receiver(
) -> Receiver<'static, CriticalSectionRawMutex, SerialMessage, { buffers::SERIAL_CHANNEL_DEPTH }> {
    SERIAL_CHANNEL.receiver()
}

/// Send a simple text message, waiting for room in the channel
pub async fn send_message(message: &'static str) {
    get_serial_sender().send(SerialMessage::Text(message)).await;
}

/// Format `args` into a fixed-size line. Output past the buffer is cut off.
pub fn format_line(args: fmt::Arguments<'_>) -> LogLine {
    let mut line = LogLine::new();
    let _ = fmt::write(&mut line, args);
    line
}

/// Format and queue a line without waiting. Used by the logging macros.
pub fn send_sync_formatted(severity: Severity, args: fmt::Arguments<'_>) {
    let _ = get_serial_sender().try_send(SerialMessage::Formatted(severity, format_line(args)));
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::serial_log::send_sync_formatted(
            $crate::serial_log::Severity::Info,
            format_args!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::serial_log::send_sync_formatted(
            $crate::serial_log::Severity::Warn,
            format_args!($($arg)*),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_line_truncates_to_buffer() {
        let long = [b'x'; 300];
        let text = core::str::from_utf8(&long).unwrap();
        let line = format_line(format_args!("{}", text));
        assert!(line.len() <= buffers::MESSAGE_BUFFER_SIZE);
    }

    #[test]
    fn format_line_keeps_short_messages() {
        let line = format_line(format_args!("Distance: {} cm", 42));
        assert_eq!(line.as_str(), "Distance: 42 cm");
    }
}
