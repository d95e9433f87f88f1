use super::codec::ACK;
use super::commands::Command;
use super::decoder;
use super::frame::{receive_frame, Frame};
use super::structs::{DeviceType, ReadingsSnapshot, ScaledValue, TariffReadings};
use super::transport::Transport;
use super::NevaError;
use crate::config::SerialConfig;
use log::{debug, info, warn};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub main_baud_rate: u32,
    /// Deadline for the answer to a data request
    pub data_timeout: Duration,
    /// Deadline for the answer to the baud switch request
    pub handshake_timeout: Duration,
    /// Time the meter needs to switch its own baud rate
    pub settle_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            main_baud_rate: 9600,
            data_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_millis(200),
        }
    }
}

impl From<&SerialConfig> for SessionSettings {
    fn from(config: &SerialConfig) -> Self {
        SessionSettings {
            main_baud_rate: config.main_baudrate,
            data_timeout: Duration::from_millis(config.data_timeout_ms),
            handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
            settle_delay: Duration::from_millis(config.settle_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    LoggedIn,
    Authenticated,
}

/// One conversation with the meter. Owns the line for its whole lifetime.
pub struct Session<T: Transport> {
    transport: T,
    settings: SessionSettings,
    state: SessionState,
    device_type: DeviceType,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, settings: SessionSettings) -> Self {
        Session {
            transport,
            settings,
            state: SessionState::Closed,
            device_type: DeviceType::Unknown,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn send(&mut self, command: Command) -> Result<(), NevaError> {
        let wire = command.wire_bytes();
        debug!("Sent {}: {}", command, hex::encode(&wire));
        self.transport.write_all(&wire)
    }

    fn exchange(&mut self, command: Command, timeout: Duration) -> Result<Frame, NevaError> {
        self.send(command)?;
        receive_frame(&mut self.transport, command, timeout)
    }

    /// Data request, only valid once the password was accepted
    fn request(&mut self, command: Command) -> Result<Vec<u8>, NevaError> {
        if self.state != SessionState::Authenticated {
            return Err(NevaError::OutOfSequence(command));
        }
        let timeout = self.settings.data_timeout;
        self.exchange(command, timeout)?.into_payload()
    }

    /// Sign on and find out which meter family answers
    pub fn open_session(&mut self) -> Result<DeviceType, NevaError> {
        self.state = SessionState::Closed;
        self.device_type = DeviceType::Unknown;

        let timeout = self.settings.data_timeout;
        let line = self.exchange(Command::OpenChannel, timeout)?.into_payload()?;
        debug!("Login line: {:?}", String::from_utf8_lossy(&line));

        let device_type = decoder::device_type_from_login(&line);
        if device_type == DeviceType::Unknown {
            return Err(NevaError::DeviceUnknown);
        }

        self.device_type = device_type;
        self.state = SessionState::LoggedIn;
        Ok(device_type)
    }

    /// Switches both sides to the main baud rate and logs in with the password
    pub fn ack_start(&mut self) -> Result<(), NevaError> {
        if self.state != SessionState::LoggedIn {
            return Err(NevaError::OutOfSequence(Command::AckStart));
        }

        self.send(Command::AckStart)?;
        /* The meter changes its baud rate on its own, we must not read before it did */
        std::thread::sleep(self.settings.settle_delay);
        self.transport.set_baud_rate(self.settings.main_baud_rate)?;

        let timeout = self.settings.handshake_timeout;
        let answer = receive_frame(&mut self.transport, Command::AckStart, timeout)?.into_payload()?;
        debug!("Baud switch acknowledged with {}", hex::encode(&answer));

        let password = self.device_type.password_command().ok_or(NevaError::DeviceUnknown)?;
        let timeout = self.settings.data_timeout;
        let reply = self.exchange(password, timeout)?.into_payload()?;
        if reply != [ACK] {
            return Err(NevaError::InvalidFormat(format!("password not acknowledged: {}", hex::encode(&reply))));
        }

        self.state = SessionState::Authenticated;
        Ok(())
    }

    pub fn read_serial_number(&mut self) -> Result<String, NevaError> {
        let payload = self.request(Command::SerialNumber)?;
        decoder::str_from_brackets(&payload)
    }

    pub fn read_tariffs(&mut self) -> Result<TariffReadings, NevaError> {
        let command = self.device_type.tariffs_command().ok_or(NevaError::DeviceUnknown)?;
        let payload = self.request(command)?;
        decoder::decode_tariffs(self.device_type, &payload)
    }

    pub fn read_battery_level(&mut self) -> Result<u8, NevaError> {
        let payload = self.request(Command::SensorsData)?;
        let millivolts = decoder::battery_millivolts(&payload)?;
        debug!("Battery at {} mV", millivolts);
        Ok(decoder::battery_level(millivolts))
    }

    pub fn read_power(&mut self) -> Result<ScaledValue, NevaError> {
        let payload = self.request(Command::PowerData)?;
        let reading = decoder::number_from_brackets(&payload)?;
        Ok(decoder::scale_power(self.device_type, reading))
    }

    pub fn read_voltage(&mut self) -> Result<ScaledValue, NevaError> {
        let payload = self.request(Command::VoltsData)?;
        decoder::number_from_brackets(&payload)
    }

    pub fn read_current(&mut self) -> Result<ScaledValue, NevaError> {
        let payload = self.request(Command::AmpsData)?;
        decoder::number_from_brackets(&payload)
    }

    /// Runs every data request once. A failed read only leaves its field empty.
    pub fn read_snapshot(&mut self) -> ReadingsSnapshot {
        let mut snapshot = ReadingsSnapshot::new(self.device_type);

        snapshot.serial_number = keep(self.read_serial_number(), "serial number");
        snapshot.tariffs = keep(self.read_tariffs(), "tariffs");
        snapshot.battery_level = keep(self.read_battery_level(), "battery level");
        snapshot.power = keep(self.read_power(), "power");
        snapshot.voltage = keep(self.read_voltage(), "voltage");
        snapshot.current = keep(self.read_current(), "current");

        snapshot
    }

    /// Tells the meter to hang up. Nobody waits for an answer.
    pub fn close_session(&mut self) {
        if let Err(e) = self.send(Command::CloseChannel) {
            warn!("Unable to close the meter session: {}", e);
        }
        self.state = SessionState::Closed;
    }
}

fn keep<V>(result: Result<V, NevaError>, what: &str) -> Option<V> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Reading {} failed: {}", what, e);
            None
        }
    }
}

fn sign_on_and_read<T: Transport>(session: &mut Session<T>) -> Result<ReadingsSnapshot, NevaError> {
    let device_type = session.open_session()?;
    info!("Meter answered as {}", device_type.model());
    session.ack_start()?;
    Ok(session.read_snapshot())
}

/// One complete poll cycle. The line is closed when `transport` is dropped on return.
pub fn poll_meter<T: Transport>(transport: T, settings: SessionSettings) -> Result<ReadingsSnapshot, NevaError> {
    let mut session = Session::new(transport, settings);
    let outcome = sign_on_and_read(&mut session);
    session.close_session();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering_neva::codec;
    use crate::metering_neva::transport::mock::{block, MockTransport};

    fn fast_settings() -> SessionSettings {
        SessionSettings {
            main_baud_rate: 9600,
            data_timeout: Duration::from_millis(40),
            handshake_timeout: Duration::from_millis(200),
            settle_delay: Duration::from_millis(0),
        }
    }

    fn encoded_block(payload: &[u8]) -> Vec<Vec<u8>> {
        vec![codec::encode(&block(payload))]
    }

    fn password_request() -> Vec<Vec<u8>> {
        let mut answer = vec![codec::SOH, b'P', b'0'];
        answer.extend(block(b"(12345678)"));
        vec![codec::encode(&answer)]
    }

    fn authenticated(login: &[u8]) -> MockTransport {
        MockTransport::new()
            .reply(vec![codec::encode(login)])
            .reply(password_request())
            .reply(vec![vec![ACK]])
    }

    #[test]
    fn test_full_cycle_7109() {
        let transport = authenticated(b"/NEV5.7109\r\n")
            .reply(encoded_block(b"600100FF(00112233)"))
            .reply(encoded_block(b"0F0880FF[S]1.5,2.25,0,0.1)"))
            .reply(encoded_block(b"600500FF(1,3.10,0)"))
            .reply(encoded_block(b"100700FF(0012.3400)"))
            .reply(encoded_block(b"0C0700FF(230.12)"))
            .reply(encoded_block(b"0B0700FF(5.123)"));

        let mut session = Session::new(transport, fast_settings());
        assert_eq!(session.open_session().unwrap(), DeviceType::Type7109);
        assert_eq!(session.state(), SessionState::LoggedIn);
        session.ack_start().unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);

        let snapshot = session.read_snapshot();
        session.close_session();

        assert_eq!(snapshot.device_type, DeviceType::Type7109);
        assert_eq!(snapshot.serial_number.as_deref(), Some("00112233"));
        assert_eq!(snapshot.tariffs.unwrap().total, ScaledValue::new(385, 100));
        assert_eq!(snapshot.battery_level, Some(100));
        assert_eq!(snapshot.power, Some(ScaledValue::new(1234, 1000)));
        assert_eq!(snapshot.voltage, Some(ScaledValue::new(23012, 100)));
        assert_eq!(snapshot.current, Some(ScaledValue::new(5123, 1000)));

        let transport = session.transport();
        assert_eq!(transport.baud_rates, vec![9600]);
        let sent: Vec<Vec<u8>> = [
            Command::OpenChannel,
            Command::AckStart,
            Command::Password7109,
            Command::SerialNumber,
            Command::Tariffs7109,
            Command::SensorsData,
            Command::PowerData,
            Command::VoltsData,
            Command::AmpsData,
            Command::CloseChannel,
        ].iter().map(|c| c.wire_bytes()).collect();
        assert_eq!(transport.written, sent);
    }

    #[test]
    fn test_6102_uses_its_own_password_and_tariffs() {
        let transport = authenticated(b"/NEV5.6102\r\n")
            .reply(vec![])
            .reply(encoded_block(b"0F0880FF(10.5,10.5,0,0,0)"));

        let mut session = Session::new(transport, fast_settings());
        session.open_session().unwrap();
        session.ack_start().unwrap();
        assert!(session.read_serial_number().is_err());
        let tariffs = session.read_tariffs().unwrap();
        assert_eq!(tariffs.total, ScaledValue::new(105, 10));

        let written = &session.transport().written;
        assert_eq!(written[2], Command::Password6102.wire_bytes());
        assert_eq!(written[4], Command::Tariffs6102.wire_bytes());
    }

    #[test]
    fn test_failed_read_leaves_gap() {
        let transport = authenticated(b"/NEV5.6102\r\n")
            .reply(encoded_block(b"(42)"))
            .reply(vec![])
            .reply(vec![])
            .reply(vec![b"\x02(12".to_vec()])
            .reply(encoded_block(b"(229.9)"))
            .reply(vec![]);

        let snapshot = poll_meter(transport, fast_settings()).unwrap();
        assert_eq!(snapshot.serial_number.as_deref(), Some("42"));
        assert_eq!(snapshot.tariffs, None);
        assert_eq!(snapshot.battery_level, None);
        assert_eq!(snapshot.power, None);
        assert_eq!(snapshot.voltage, Some(ScaledValue::new(2299, 10)));
        assert_eq!(snapshot.current, None);
    }

    #[test]
    fn test_unknown_meter_aborts_cycle() {
        let transport = MockTransport::new().reply(vec![codec::encode(b"/NEV5.9999\r\n")]);
        let mut session = Session::new(transport, fast_settings());
        assert_eq!(session.open_session(), Err(NevaError::DeviceUnknown));
        assert_eq!(session.ack_start(), Err(NevaError::OutOfSequence(Command::AckStart)));
    }

    #[test]
    fn test_poll_closes_even_when_handshake_fails() {
        let transport = MockTransport::new().reply(vec![codec::encode(b"/NEV5.2106\r\n")]);
        let mut session = Session::new(transport, fast_settings());
        let outcome = sign_on_and_read(&mut session);
        session.close_session();

        assert_eq!(outcome, Err(NevaError::Timeout(Command::AckStart)));
        let written = &session.transport().written;
        assert_eq!(written.len(), 3);
        assert_eq!(written[2], Command::CloseChannel.wire_bytes());
    }

    #[test]
    fn test_rejected_password_aborts() {
        let transport = MockTransport::new()
            .reply(vec![codec::encode(b"/NEV5.7109\r\n")])
            .reply(password_request())
            .reply(encoded_block(b"(ERR01)"));
        let mut session = Session::new(transport, fast_settings());
        session.open_session().unwrap();
        assert!(matches!(session.ack_start(), Err(NevaError::InvalidFormat(_))));
        assert_eq!(session.state(), SessionState::LoggedIn);
    }

    #[test]
    fn test_data_requests_need_authentication() {
        let mut session = Session::new(MockTransport::new(), fast_settings());
        assert_eq!(session.read_voltage(), Err(NevaError::OutOfSequence(Command::VoltsData)));
        assert!(session.transport().written.is_empty());
    }

    #[test]
    fn test_lone_slash_login() {
        let transport = MockTransport::new().reply(vec![b"/".to_vec()]);
        let mut session = Session::new(transport, fast_settings());
        assert_eq!(session.open_session().unwrap(), DeviceType::Type6102);
    }
}
