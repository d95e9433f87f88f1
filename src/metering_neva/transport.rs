use super::NevaError;
use log::debug;
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// Minimal view of the serial line the session needs. Closing happens on drop.
pub trait Transport {
    /// Returns whatever is pending on the line, an empty vector if nothing is
    fn read_available(&mut self) -> Result<Vec<u8>, NevaError>;
    fn write_all(&mut self, data: &[u8]) -> Result<(), NevaError>;
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), NevaError>;
}

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Opens the optical head at 7E1, the framing the meter expects
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, NevaError> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Seven)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| NevaError::Transport(format!("unable to open {port_name}: {e}")))?;

        debug!("Opened {} at {} baud", port_name, baud_rate);
        Ok(SerialTransport { port })
    }
}

impl Transport for SerialTransport {
    fn read_available(&mut self) -> Result<Vec<u8>, NevaError> {
        let pending = self.port.bytes_to_read()
            .map_err(|e| NevaError::Transport(e.to_string()))? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; pending];
        let n = match self.port.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut => 0,
            Err(e) => return Err(NevaError::Transport(e.to_string())),
        };
        buf.truncate(n);
        Ok(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), NevaError> {
        self.port.write_all(data).map_err(|e| NevaError::Transport(e.to_string()))?;
        self.port.flush().map_err(|e| NevaError::Transport(e.to_string()))
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), NevaError> {
        self.port.set_baud_rate(baud_rate).map_err(|e| NevaError::Transport(e.to_string()))
    }
}
