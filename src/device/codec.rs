//! Framing of the JI Band protocol.
//!
//! Commands travel as a single byte (the command discriminant). Notifications are short ASCII
//! keywords; anything that is not a known keyword is passed on verbatim as
//! [`InboundEvent::Custom`].

use std::borrow::Cow;

use crate::device::types::{InboundEvent, OutboundMessage};

const KEYWORDS: [(&str, InboundEvent); 7] = [
    ("CALIBRATION_FAILED", InboundEvent::CalibrationFailed),
    ("CALIBRATION_STARTED", InboundEvent::CalibrationStarted),
    ("CALIBRATION_SUCCESS", InboundEvent::CalibrationSucceeded),
    ("DEVICE_STARTED_COLLECTION", InboundEvent::CollectionStarted),
    ("DEVICE_STOPPED_COLLECTION", InboundEvent::CollectionStopped),
    ("ENTERED_LOW_POWER_MODE", InboundEvent::EnteredLowPowerMode),
    ("EXITED_LOW_POWER_MODE", InboundEvent::ExitedLowPowerMode),
];

/// The payload is not put on the wire.
pub fn encode(message: impl Into<OutboundMessage>) -> [u8; 1] {
    [message.into().command.discriminant()]
}

fn frame_text(frame: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(frame) {
        Ok(text) => Cow::Borrowed(text),
        // latin-1: every byte maps to exactly one char, nothing is lost
        Err(_) => Cow::Owned(frame.iter().map(|&byte| byte as char).collect()),
    }
}

pub fn decode(frame: &[u8]) -> InboundEvent {
    let text = frame_text(frame);
    let trimmed = text.trim();
    let normalized = trimmed.to_uppercase();

    KEYWORDS
        .iter()
        .find(|(keyword, _)| *keyword == normalized)
        .map(|(_, event)| event.clone())
        .unwrap_or_else(|| InboundEvent::Custom(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::OutboundCommand;

    // reads a command frame back, as the band does
    fn decode_command(frame: &[u8]) -> Option<OutboundCommand> {
        match frame {
            [byte] => OutboundCommand::from_discriminant(*byte),
            _ => None,
        }
    }

    #[test]
    fn commands_survive_the_wire() {
        for command in OutboundCommand::ALL {
            let frame = encode(command);
            assert_eq!(frame.len(), 1);
            assert_eq!(frame[0], command.discriminant());
            assert_eq!(decode_command(&frame), Some(command));
        }
        assert_eq!(encode(OutboundCommand::ToggleCalibration), [0x02]);
    }

    #[test]
    fn payload_stays_off_the_wire() {
        let message = OutboundMessage { command: OutboundCommand::ToggleLowPowerMode, payload: "ignored".to_string() };
        assert_eq!(encode(message), [0x03]);
    }

    #[test]
    fn decode_command_rejects_unknown_frames() {
        assert_eq!(decode_command(&[]), None);
        assert_eq!(decode_command(&[0x09]), None);
        assert_eq!(decode_command(&[0x01, 0x02]), None);
    }

    #[test]
    fn keywords_match_regardless_of_case_and_whitespace() {
        assert_eq!(decode(b"CALIBRATION_SUCCESS"), InboundEvent::CalibrationSucceeded);
        assert_eq!(decode(b"  calibration_failed\r\n"), InboundEvent::CalibrationFailed);
        assert_eq!(decode(b"Device_Started_Collection"), InboundEvent::CollectionStarted);
        assert_eq!(decode(b"\tdevice_stopped_collection "), InboundEvent::CollectionStopped);
        assert_eq!(decode(b"entered_low_power_mode"), InboundEvent::EnteredLowPowerMode);
        assert_eq!(decode(b"EXITED_LOW_POWER_MODE\n"), InboundEvent::ExitedLowPowerMode);
        assert_eq!(decode(b"calibration_started"), InboundEvent::CalibrationStarted);
    }

    #[test]
    fn unknown_text_keeps_original_casing() {
        assert_eq!(decode(b"  Battery 87%  "), InboundEvent::Custom("Battery 87%".to_string()));
        // keywords must match the whole text
        assert_eq!(
            decode(b"CALIBRATION_SUCCESS!"),
            InboundEvent::Custom("CALIBRATION_SUCCESS!".to_string()),
        );
        assert_eq!(decode(b""), InboundEvent::Custom(String::new()));
    }

    #[test]
    fn invalid_utf8_is_transliterated() {
        assert_eq!(decode(&[0x41, 0xff, 0x42]), InboundEvent::Custom("A\u{ff}B".to_string()));
    }
}
