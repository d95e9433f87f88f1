use super::codec::{self, ACK, ETX, STX};
use super::commands::Command;
use super::transport::Transport;
use super::NevaError;
use log::{debug, warn};
use std::time::{Duration, Instant};

/// Delay between two polls of an idle line
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Extra wait granted once after the deadline for a block that is still open
const SUPPLEMENTARY_READ: Duration = Duration::from_millis(100);
/// Silence that ends the answer to the baud switch request
const HANDSHAKE_IDLE_GAP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Ok,
    ChecksumMismatch,
    Timeout,
    Incomplete,
    InvalidFormat,
}

/// One answer of the meter, parity already stripped
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub command: Command,
    pub bytes: Vec<u8>,
    pub status: FrameStatus,
}

impl Frame {
    fn new(command: Command, bytes: Vec<u8>, status: FrameStatus) -> Self {
        Frame { command, bytes, status }
    }

    pub fn is_ok(&self) -> bool {
        self.status == FrameStatus::Ok
    }

    /// Hands out the bytes of a valid frame, maps every other status to its error
    pub fn into_payload(self) -> Result<Vec<u8>, NevaError> {
        match self.status {
            FrameStatus::Ok => Ok(self.bytes),
            FrameStatus::Timeout => Err(NevaError::Timeout(self.command)),
            FrameStatus::Incomplete => Err(NevaError::Incomplete(self.command)),
            FrameStatus::ChecksumMismatch => Err(NevaError::ChecksumMismatch(self.command)),
            FrameStatus::InvalidFormat => Err(NevaError::InvalidFormat(
                format!("unexpected answer to {}: {}", self.command, hex::encode(&self.bytes)),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FrameKind {
    /// `/XXX5.nnnn` CR LF identification line
    Login,
    /// Whatever comes back after the baud switch request
    Handshake,
    /// STX ... ETX BCC data block, or a lone ACK
    Block,
}

impl FrameKind {
    fn for_command(command: Command) -> Self {
        match command {
            Command::OpenChannel => FrameKind::Login,
            Command::AckStart => FrameKind::Handshake,
            _ => FrameKind::Block,
        }
    }
}

/// Collects the chunks of one answer until a frame can be cut out of them.
/// Lives for exactly one exchange.
pub struct FrameAssembler {
    command: Command,
    kind: FrameKind,
    buffer: Vec<u8>,
    search_from: usize,
    rejected_blocks: usize,
}

impl FrameAssembler {
    pub fn new(command: Command) -> Self {
        FrameAssembler {
            command,
            kind: FrameKind::for_command(command),
            buffer: Vec::new(),
            search_from: 0,
            rejected_blocks: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Feeds raw bytes from the line. Returns the frame as soon as it is complete.
    pub fn push(&mut self, raw: &[u8]) -> Option<Frame> {
        self.buffer.extend(codec::decode(raw));

        match self.kind {
            FrameKind::Login => self.scan_login(),
            FrameKind::Handshake => None,
            FrameKind::Block => self.scan_block(),
        }
    }

    /// Called when the deadline passed, decides what the collected bytes are worth
    pub fn finish(self) -> Frame {
        if self.buffer.is_empty() {
            return Frame::new(self.command, self.buffer, FrameStatus::Timeout);
        }

        let status = match self.kind {
            FrameKind::Handshake => FrameStatus::Ok,
            FrameKind::Login => {
                if self.buffer[0] != b'/' {
                    FrameStatus::InvalidFormat
                } else if self.buffer == b"/" {
                    /* The meter woke up but did not send its ident */
                    FrameStatus::Ok
                } else {
                    FrameStatus::Incomplete
                }
            }
            FrameKind::Block => {
                if self.buffer == [ACK] {
                    FrameStatus::Ok
                } else if self.rejected_blocks > 0 {
                    FrameStatus::ChecksumMismatch
                } else {
                    FrameStatus::Incomplete
                }
            }
        };

        Frame::new(self.command, self.buffer, status)
    }

    fn scan_login(&mut self) -> Option<Frame> {
        let end = self.buffer.windows(2).position(|w| w == b"\r\n")? + 2;
        let line = self.buffer[..end].to_vec();

        if line[0] != b'/' {
            debug!("Login answer does not start with '/': {}", hex::encode(&line));
            return Some(Frame::new(self.command, line, FrameStatus::InvalidFormat));
        }
        Some(Frame::new(self.command, line, FrameStatus::Ok))
    }

    fn scan_block(&mut self) -> Option<Frame> {
        loop {
            let stx = self.search_from + self.buffer[self.search_from..].iter().position(|b| *b == STX)?;
            let etx = stx + self.buffer[stx..].iter().position(|b| *b == ETX)?;

            /* ETX must be followed by its checksum byte */
            if self.buffer.len() < etx + 2 {
                return None;
            }

            let block = &self.buffer[stx..=etx + 1];
            if codec::verify_checksum(block) {
                if stx > 0 {
                    warn!("Dropping {} bytes before STX in answer to {}: {}",
                          stx, self.command, hex::encode(&self.buffer[..stx]));
                }
                return Some(Frame::new(self.command, block.to_vec(), FrameStatus::Ok));
            }

            warn!("Checksum mismatch in answer to {}: got {:#04x}, expected {:#04x}",
                  self.command, block[block.len() - 1], codec::checksum(block));
            self.rejected_blocks += 1;
            self.search_from = etx + 2;
        }
    }
}

/// Reads the answer to `command` until a frame is complete or `timeout` elapsed
pub fn receive_frame<T: Transport>(transport: &mut T, command: Command, timeout: Duration) -> Result<Frame, NevaError> {
    let mut assembler = FrameAssembler::new(command);
    let deadline = Instant::now() + timeout;
    let mut last_data: Option<Instant> = None;

    while Instant::now() < deadline {
        let chunk = transport.read_available()?;
        if chunk.is_empty() {
            if assembler.kind == FrameKind::Handshake {
                if let Some(at) = last_data {
                    if at.elapsed() >= HANDSHAKE_IDLE_GAP {
                        break;
                    }
                }
            }
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }

        debug!("Received for {}: {}", command, hex::encode(&chunk));
        last_data = Some(Instant::now());
        if let Some(frame) = assembler.push(&chunk) {
            return Ok(frame);
        }
    }

    if assembler.kind == FrameKind::Block && !assembler.is_empty() {
        std::thread::sleep(SUPPLEMENTARY_READ);
        let chunk = transport.read_available()?;
        if !chunk.is_empty() {
            debug!("Late bytes for {}: {}", command, hex::encode(&chunk));
            if let Some(frame) = assembler.push(&chunk) {
                return Ok(frame);
            }
        }
    }

    let frame = assembler.finish();
    debug!("Answer to {} ended as {:?}", command, frame.status);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering_neva::transport::mock::{block, MockTransport};

    #[test]
    fn test_fragmented_block_completes_on_second_chunk() {
        let full = block(b"100700FF(0.1234)");
        let (first, second) = full.split_at(6);

        let mut assembler = FrameAssembler::new(Command::PowerData);
        assert!(assembler.push(&codec::encode(first)).is_none());
        let frame = assembler.push(&codec::encode(second)).unwrap();
        assert_eq!(frame.status, FrameStatus::Ok);
        assert_eq!(frame.bytes, full);
    }

    #[test]
    fn test_block_waits_for_checksum_byte() {
        let full = block(b"(230.1)");
        let mut assembler = FrameAssembler::new(Command::VoltsData);
        assert!(assembler.push(&full[..full.len() - 1]).is_none());
        assert!(assembler.push(&full[full.len() - 1..]).is_some());
    }

    #[test]
    fn test_mismatch_then_retransmission() {
        let good = block(b"(230.1)");
        let mut bad = good.clone();
        *bad.last_mut().unwrap() ^= 0x10;

        let mut assembler = FrameAssembler::new(Command::VoltsData);
        assert!(assembler.push(&bad).is_none());
        let frame = assembler.push(&good).unwrap();
        assert_eq!(frame.status, FrameStatus::Ok);
        assert_eq!(frame.bytes, good);
    }

    #[test]
    fn test_mismatch_only_reports_checksum_error() {
        let mut bad = block(b"(230.1)");
        *bad.last_mut().unwrap() ^= 0x10;

        let mut assembler = FrameAssembler::new(Command::VoltsData);
        assert!(assembler.push(&bad).is_none());
        assert_eq!(assembler.finish().status, FrameStatus::ChecksumMismatch);
    }

    #[test]
    fn test_garbage_before_stx_is_dropped() {
        let good = block(b"(5.000)");
        let mut data = b"\x7f\x00junk".to_vec();
        data.extend_from_slice(&good);

        let mut assembler = FrameAssembler::new(Command::AmpsData);
        let frame = assembler.push(&data).unwrap();
        assert_eq!(frame.bytes, good);
    }

    #[test]
    fn test_single_ack_is_valid_at_deadline() {
        let mut assembler = FrameAssembler::new(Command::Password6102);
        assert!(assembler.push(&[ACK]).is_none());
        let frame = assembler.finish();
        assert!(frame.is_ok());
        assert_eq!(frame.bytes, vec![ACK]);
    }

    #[test]
    fn test_open_block_is_incomplete() {
        let mut assembler = FrameAssembler::new(Command::SerialNumber);
        assembler.push(&[STX, b'(', b'1']);
        assert_eq!(assembler.finish().status, FrameStatus::Incomplete);
        assert_eq!(FrameAssembler::new(Command::SerialNumber).finish().status, FrameStatus::Timeout);
    }

    #[test]
    fn test_login_line() {
        let mut assembler = FrameAssembler::new(Command::OpenChannel);
        assert!(assembler.push(&codec::encode(b"/NEV5")).is_none());
        let frame = assembler.push(&codec::encode(b".7109\r\n")).unwrap();
        assert!(frame.is_ok());
        assert_eq!(frame.bytes, b"/NEV5.7109\r\n".to_vec());
    }

    #[test]
    fn test_login_must_start_with_slash() {
        let mut assembler = FrameAssembler::new(Command::OpenChannel);
        let frame = assembler.push(b"NEV5.7109\r\n").unwrap();
        assert_eq!(frame.status, FrameStatus::InvalidFormat);
        assert!(frame.into_payload().is_err());
    }

    #[test]
    fn test_lone_slash_is_minimal_login() {
        let mut assembler = FrameAssembler::new(Command::OpenChannel);
        assert!(assembler.push(b"/").is_none());
        assert!(assembler.finish().is_ok());

        let mut assembler = FrameAssembler::new(Command::OpenChannel);
        assembler.push(b"/NEV");
        assert_eq!(assembler.finish().status, FrameStatus::Incomplete);
    }

    #[test]
    fn test_receive_frame_over_transport() {
        let full = block(b"0C0700FF(230.12)");
        let (first, second) = full.split_at(4);
        let mut transport = MockTransport::new()
            .preload(vec![codec::encode(first), Vec::new(), codec::encode(second)]);

        let frame = receive_frame(&mut transport, Command::VoltsData, Duration::from_millis(500)).unwrap();
        assert!(frame.is_ok());
        assert_eq!(frame.bytes, full);
    }

    #[test]
    fn test_receive_frame_times_out() {
        let mut transport = MockTransport::new();
        let frame = receive_frame(&mut transport, Command::PowerData, Duration::from_millis(30)).unwrap();
        assert_eq!(frame.status, FrameStatus::Timeout);
        assert_eq!(frame.into_payload(), Err(NevaError::Timeout(Command::PowerData)));
    }

    /// Sends the head of a block at once and the tail only after the deadline passed
    struct LateTail {
        head: Option<Vec<u8>>,
        tail: Option<Vec<u8>>,
        tail_at: Instant,
    }

    impl Transport for LateTail {
        fn read_available(&mut self) -> Result<Vec<u8>, NevaError> {
            if let Some(head) = self.head.take() {
                return Ok(head);
            }
            if Instant::now() >= self.tail_at {
                return Ok(self.tail.take().unwrap_or_default());
            }
            Ok(Vec::new())
        }

        fn write_all(&mut self, _data: &[u8]) -> Result<(), NevaError> {
            Ok(())
        }

        fn set_baud_rate(&mut self, _baud_rate: u32) -> Result<(), NevaError> {
            Ok(())
        }
    }

    #[test]
    fn test_supplementary_read_completes_block() {
        let full = block(b"(0.1234)");
        let (first, second) = full.split_at(3);
        let timeout = Duration::from_millis(25);

        let mut transport = LateTail {
            head: Some(codec::encode(first)),
            tail: Some(codec::encode(second)),
            tail_at: Instant::now() + timeout + Duration::from_millis(40),
        };
        let frame = receive_frame(&mut transport, Command::PowerData, timeout).unwrap();
        assert_eq!(frame.status, FrameStatus::Ok);
        assert_eq!(frame.bytes, full);
    }

    #[test]
    fn test_handshake_returns_what_arrived() {
        let mut transport = MockTransport::new()
            .preload(vec![b"\x01P0\x02(".to_vec(), b"12345678)\x03\x00".to_vec()]);
        let frame = receive_frame(&mut transport, Command::AckStart, Duration::from_millis(500)).unwrap();
        assert!(frame.is_ok());
        assert_eq!(frame.bytes.len(), 16);
    }
}
