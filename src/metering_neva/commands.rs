use super::codec::{self, ACK, ETX, SOH, STX};

/// Every request the bridge ever sends to the meter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    OpenChannel,
    AckStart,
    Password6102,
    Password7109,
    SerialNumber,
    SensorsData,
    Tariffs6102,
    Tariffs7109,
    PowerData,
    VoltsData,
    AmpsData,
    CloseChannel,
}

const OPEN_CHANNEL: &[u8] = b"/?!\r\n";
const ACK_START: &[u8] = &[ACK, 0x30, 0x35, 0x31, 0x0d, 0x0a];
const PASSWORD_6102: &[u8] = &[SOH, 0x50, 0x31, STX, 0x28, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x29, ETX, 0x61];
const PASSWORD_7109: &[u8] = &[SOH, 0x50, 0x31, STX, 0x28, 0x29, ETX, 0x61];
const SERIAL_NUMBER: &[u8] = &[SOH, 0x52, 0x31, STX, 0x36, 0x30, 0x30, 0x31, 0x30, 0x30, 0x46, 0x46, 0x28, 0x29, ETX, 0x64];
const SENSORS_DATA: &[u8] = &[SOH, 0x52, 0x31, STX, 0x36, 0x30, 0x30, 0x35, 0x30, 0x30, 0x46, 0x46, 0x28, 0x29, ETX, 0x60];
const TARIFFS_6102: &[u8] = &[SOH, 0x52, 0x31, STX, 0x30, 0x46, 0x30, 0x38, 0x38, 0x30, 0x46, 0x46, 0x28, 0x29, ETX, 0x15];
const TARIFFS_7109: &[u8] = &[SOH, 0x52, 0x31, STX, 0x30, 0x46, 0x30, 0x38, 0x38, 0x30, 0x46, 0x46, 0x28, 0x53, 0x29, ETX, 0x46];
const POWER_DATA: &[u8] = &[SOH, 0x52, 0x31, STX, 0x31, 0x30, 0x30, 0x37, 0x30, 0x30, 0x46, 0x46, 0x28, 0x29, ETX, 0x65];
const VOLTS_DATA: &[u8] = &[SOH, 0x52, 0x31, STX, 0x30, 0x43, 0x30, 0x37, 0x30, 0x30, 0x46, 0x46, 0x28, 0x29, ETX, 0x17];
const AMPS_DATA: &[u8] = &[SOH, 0x52, 0x31, STX, 0x30, 0x42, 0x30, 0x37, 0x30, 0x30, 0x46, 0x46, 0x28, 0x29, ETX, 0x16];
const CLOSE_CHANNEL: &[u8] = &[SOH, 0x42, 0x30, ETX, 0x71];

impl Command {
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            Command::OpenChannel => OPEN_CHANNEL,
            Command::AckStart => ACK_START,
            Command::Password6102 => PASSWORD_6102,
            Command::Password7109 => PASSWORD_7109,
            Command::SerialNumber => SERIAL_NUMBER,
            Command::SensorsData => SENSORS_DATA,
            Command::Tariffs6102 => TARIFFS_6102,
            Command::Tariffs7109 => TARIFFS_7109,
            Command::PowerData => POWER_DATA,
            Command::VoltsData => VOLTS_DATA,
            Command::AmpsData => AMPS_DATA,
            Command::CloseChannel => CLOSE_CHANNEL,
        }
    }

    /// The sign-on and the baud switch request go out as plain ASCII
    pub fn is_parity_encoded(&self) -> bool {
        !matches!(self, Command::OpenChannel | Command::AckStart)
    }

    /// Bytes as they are put on the wire
    pub fn wire_bytes(&self) -> Vec<u8> {
        if self.is_parity_encoded() {
            return codec::encode(self.bytes());
        }
        self.bytes().to_vec()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::OpenChannel => "open_channel",
            Command::AckStart => "ack_start",
            Command::Password6102 => "password_6102",
            Command::Password7109 => "password_7109",
            Command::SerialNumber => "serial_number",
            Command::SensorsData => "sensors_data",
            Command::Tariffs6102 => "tariffs_6102",
            Command::Tariffs7109 => "tariffs_7109",
            Command::PowerData => "power_data",
            Command::VoltsData => "volts_data",
            Command::AmpsData => "amps_data",
            Command::CloseChannel => "close_channel",
        }
    }

    pub fn all() -> [Command; 12] {
        [
            Command::OpenChannel,
            Command::AckStart,
            Command::Password6102,
            Command::Password7109,
            Command::SerialNumber,
            Command::SensorsData,
            Command::Tariffs6102,
            Command::Tariffs7109,
            Command::PowerData,
            Command::VoltsData,
            Command::AmpsData,
            Command::CloseChannel,
        ]
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framed_commands_carry_valid_checksum() {
        for cmd in Command::all() {
            let bytes = cmd.bytes();
            if bytes[0] != SOH {
                continue;
            }
            assert!(codec::verify_checksum(bytes), "bad checksum in {cmd}");
            assert_eq!(bytes[bytes.len() - 2], ETX, "{cmd} must end with ETX + bcc");
        }
    }

    #[test]
    fn test_sign_on_commands_sent_raw() {
        assert_eq!(Command::OpenChannel.wire_bytes(), b"/?!\r\n".to_vec());
        assert_eq!(Command::AckStart.wire_bytes(), vec![0x06, b'0', b'5', b'1', b'\r', b'\n']);
        assert!(!Command::OpenChannel.is_parity_encoded());
        assert!(!Command::AckStart.is_parity_encoded());
    }

    #[test]
    fn test_framed_commands_parity_encoded() {
        let wire = Command::CloseChannel.wire_bytes();
        // SOH 'B' '0' ETX 'q'
        assert_eq!(wire, vec![0x81, 0x42, 0x30, 0x03, 0x71]);
        assert_eq!(codec::decode(&wire), Command::CloseChannel.bytes().to_vec());
    }

    #[test]
    fn test_tariff_requests_differ_by_format_flag() {
        let t6102 = Command::Tariffs6102.bytes();
        let t7109 = Command::Tariffs7109.bytes();
        assert_eq!(&t6102[..12], &t7109[..12]);
        assert_eq!(&t7109[12..15], b"(S)");
    }
}
