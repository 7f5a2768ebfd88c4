//! Line-oriented wire protocol.
//!
//! Every message is one line: `<origin> <clock> <type> [arg1 arg2 ...]\n`,
//! fields separated by a single space. Structured replies put a count in
//! the first argument followed by `:`-delimited tuples.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::fmt;
use std::str::FromStr;

use crate::core::{PeerIdentity, PeerRecord, PeerState};
use crate::storage::FileEntry;
use crate::utils::{P2PError, Result};

/// Offset/size placeholders carried by `DL` and `FILE`. Transfers are
/// always whole-file.
const TRANSFER_PLACEHOLDER: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // Membership
    Hello,
    GetPeers,
    PeerList,
    Bye,

    // File catalog
    ListFiles,
    FileList,
    Ls,
    LsList,

    // Transfer
    Dl,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Hello => "HELLO",
            MessageType::GetPeers => "GET_PEERS",
            MessageType::PeerList => "PEER_LIST",
            MessageType::Bye => "BYE",
            MessageType::ListFiles => "LIST_FILES",
            MessageType::FileList => "FILE_LIST",
            MessageType::Ls => "LS",
            MessageType::LsList => "LS_LIST",
            MessageType::Dl => "DL",
            MessageType::File => "FILE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = P2PError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "HELLO" => MessageType::Hello,
            "GET_PEERS" => MessageType::GetPeers,
            "PEER_LIST" => MessageType::PeerList,
            "BYE" => MessageType::Bye,
            "LIST_FILES" => MessageType::ListFiles,
            "FILE_LIST" => MessageType::FileList,
            "LS" => MessageType::Ls,
            "LS_LIST" => MessageType::LsList,
            "DL" => MessageType::Dl,
            "FILE" => MessageType::File,
            other => return Err(P2PError::UnknownMessageType(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub origin: PeerIdentity,
    pub clock: u64,
    pub msg_type: MessageType,
    pub args: Vec<String>,
}

/// One `host:port:STATE:clock` tuple of a `PEER_LIST`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub identity: PeerIdentity,
    pub state: PeerState,
    pub clock: u64,
}

/// Decoded `FILE` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub name: String,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(origin: PeerIdentity, clock: u64, msg_type: MessageType, args: Vec<String>) -> Self {
        Self {
            origin,
            clock,
            msg_type,
            args,
        }
    }

    pub fn hello(origin: PeerIdentity, clock: u64) -> Self {
        Self::new(origin, clock, MessageType::Hello, Vec::new())
    }

    pub fn get_peers(origin: PeerIdentity, clock: u64) -> Self {
        Self::new(origin, clock, MessageType::GetPeers, Vec::new())
    }

    pub fn peer_list(origin: PeerIdentity, clock: u64, records: &[PeerRecord]) -> Self {
        let entries = records.iter().map(|r| {
            format!(
                "{}:{}:{}:{}",
                r.identity.host, r.identity.port, r.state, r.last_known_clock
            )
        });
        Self::new(origin, clock, MessageType::PeerList, counted(records.len(), entries))
    }

    pub fn bye(origin: PeerIdentity, clock: u64) -> Self {
        Self::new(origin, clock, MessageType::Bye, Vec::new())
    }

    pub fn list_files(origin: PeerIdentity, clock: u64) -> Self {
        Self::new(origin, clock, MessageType::ListFiles, Vec::new())
    }

    pub fn file_list(origin: PeerIdentity, clock: u64, files: &[FileEntry]) -> Self {
        let names = files.iter().map(|f| f.name.clone()).collect();
        Self::new(origin, clock, MessageType::FileList, names)
    }

    pub fn ls(origin: PeerIdentity, clock: u64) -> Self {
        Self::new(origin, clock, MessageType::Ls, Vec::new())
    }

    pub fn ls_list(origin: PeerIdentity, clock: u64, files: &[FileEntry]) -> Self {
        let entries = files.iter().map(|f| format!("{}:{}", f.name, f.size));
        Self::new(origin, clock, MessageType::LsList, counted(files.len(), entries))
    }

    pub fn dl(origin: PeerIdentity, clock: u64, file_name: &str) -> Self {
        Self::new(
            origin,
            clock,
            MessageType::Dl,
            vec![
                file_name.to_string(),
                TRANSFER_PLACEHOLDER.to_string(),
                TRANSFER_PLACEHOLDER.to_string(),
            ],
        )
    }

    pub fn file(origin: PeerIdentity, clock: u64, file_name: &str, data: &[u8]) -> Self {
        Self::new(
            origin,
            clock,
            MessageType::File,
            vec![
                file_name.to_string(),
                TRANSFER_PLACEHOLDER.to_string(),
                TRANSFER_PLACEHOLDER.to_string(),
                BASE64.encode(data),
            ],
        )
    }

    /// Serialize to a newline-terminated wire line.
    pub fn encode(&self) -> String {
        let mut line = format!("{} {} {}", self.origin, self.clock, self.msg_type);
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line.push('\n');
        line
    }

    pub fn decode(line: &str) -> Result<Self> {
        let body = line
            .strip_suffix('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .unwrap_or(line);

        let fields: Vec<&str> = body.split(' ').collect();
        if fields.len() < 3 {
            return Err(P2PError::MalformedMessage(format!(
                "expected at least 3 fields in '{}'",
                body
            )));
        }

        let origin: PeerIdentity = fields[0].parse().map_err(|_| {
            P2PError::MalformedMessage(format!("invalid origin '{}' in '{}'", fields[0], body))
        })?;

        let clock_field = fields[1];
        if clock_field.is_empty() || !clock_field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(P2PError::InvalidClock(clock_field.to_string()));
        }
        let clock = clock_field
            .parse::<u64>()
            .map_err(|_| P2PError::InvalidClock(clock_field.to_string()))?;

        let msg_type: MessageType = fields[2].parse()?;
        let args = fields[3..].iter().map(|a| a.to_string()).collect();

        Ok(Self::new(origin, clock, msg_type, args))
    }

    /// Entries of a `PEER_LIST` reply.
    pub fn peer_entries(&self) -> Result<Vec<PeerEntry>> {
        self.expect_type(MessageType::PeerList)?;
        self.counted_args()?
            .iter()
            .map(|raw| parse_peer_entry(raw))
            .collect()
    }

    /// Entries of an `LS_LIST` reply.
    pub fn ls_entries(&self) -> Result<Vec<FileEntry>> {
        self.expect_type(MessageType::LsList)?;
        self.counted_args()?
            .iter()
            .map(|raw| {
                let (name, size) = raw.rsplit_once(':').ok_or_else(|| {
                    P2PError::InvalidPayload(format!("expected name:size, got '{}'", raw))
                })?;
                let size = size.parse::<u64>().map_err(|_| {
                    P2PError::InvalidPayload(format!("invalid file size in '{}'", raw))
                })?;
                if name.is_empty() {
                    return Err(P2PError::InvalidPayload(format!("empty file name in '{}'", raw)));
                }
                Ok(FileEntry {
                    name: name.to_string(),
                    size,
                })
            })
            .collect()
    }

    /// Names carried by a `FILE_LIST` reply.
    pub fn file_names(&self) -> Result<Vec<String>> {
        self.expect_type(MessageType::FileList)?;
        Ok(self.args.iter().filter(|a| !a.is_empty()).cloned().collect())
    }

    /// File name requested by a `DL`.
    pub fn requested_file(&self) -> Result<&str> {
        self.expect_type(MessageType::Dl)?;
        match self.args.first() {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(P2PError::InvalidPayload("DL without a file name".to_string())),
        }
    }

    /// Name and decoded contents of a `FILE` reply.
    pub fn file_payload(&self) -> Result<FilePayload> {
        self.expect_type(MessageType::File)?;
        if self.args.len() != 4 {
            return Err(P2PError::InvalidPayload(format!(
                "FILE expects 4 arguments, got {}",
                self.args.len()
            )));
        }

        let data = BASE64
            .decode(self.args[3].as_bytes())
            .map_err(|e| P2PError::InvalidPayload(format!("invalid base64 payload: {}", e)))?;

        Ok(FilePayload {
            name: self.args[0].clone(),
            data,
        })
    }

    fn expect_type(&self, expected: MessageType) -> Result<()> {
        if self.msg_type == expected {
            Ok(())
        } else {
            Err(P2PError::InvalidPayload(format!(
                "expected {}, got {}",
                expected, self.msg_type
            )))
        }
    }

    /// Arguments after the leading count, checked against it.
    fn counted_args(&self) -> Result<&[String]> {
        let declared = self
            .args
            .first()
            .ok_or_else(|| P2PError::InvalidPayload(format!("{} without a count", self.msg_type)))?;
        let declared = declared.parse::<usize>().map_err(|_| {
            P2PError::InvalidPayload(format!("invalid entry count '{}'", declared))
        })?;

        let entries = &self.args[1..];
        if entries.len() != declared {
            return Err(P2PError::PayloadCountMismatch {
                declared,
                actual: entries.len(),
            });
        }
        Ok(entries)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode().trim_end_matches('\n'))
    }
}

fn counted(count: usize, entries: impl Iterator<Item = String>) -> Vec<String> {
    std::iter::once(count.to_string()).chain(entries).collect()
}

fn parse_peer_entry(raw: &str) -> Result<PeerEntry> {
    let invalid = || P2PError::InvalidPayload(format!("expected host:port:STATE:clock, got '{}'", raw));

    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 4 {
        return Err(invalid());
    }

    let identity: PeerIdentity = format!("{}:{}", parts[0], parts[1])
        .parse()
        .map_err(|_| invalid())?;
    let state: PeerState = parts[2].parse()?;
    let clock = parts[3].parse::<u64>().map_err(|_| invalid())?;

    Ok(PeerEntry {
        identity,
        state,
        clock,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> PeerIdentity {
        PeerIdentity::new("127.0.0.1", 5000)
    }

    #[test]
    fn test_encode_layout() {
        let msg = Message::hello(origin(), 3);
        assert_eq!(msg.encode(), "127.0.0.1:5000 3 HELLO\n");

        let msg = Message::dl(origin(), 4, "notes.txt");
        assert_eq!(msg.encode(), "127.0.0.1:5000 4 DL notes.txt 0 0\n");
    }

    #[test]
    fn test_round_trip_lines() {
        let lines = [
            "127.0.0.1:5000 1 HELLO\n",
            "localhost:9001 42 GET_PEERS\n",
            "10.0.0.1:5000 7 PEER_LIST 2 10.0.0.2:5001:ONLINE:7 10.0.0.3:5002:OFFLINE:2\n",
            "10.0.0.1:5000 8 LS_LIST 1 a.txt:12\n",
            "10.0.0.1:5000 9 FILE a.txt 0 0 aGVsbG8=\n",
            "10.0.0.1:5000 0 BYE\n",
        ];
        for line in lines {
            let decoded = Message::decode(line).unwrap();
            assert_eq!(decoded.encode(), line);
        }
    }

    #[test]
    fn test_decode_fields() {
        let msg = Message::decode("127.0.0.1:5000 12 DL song.mp3 0 0\r\n").unwrap();
        assert_eq!(msg.origin, origin());
        assert_eq!(msg.clock, 12);
        assert_eq!(msg.msg_type, MessageType::Dl);
        assert_eq!(msg.requested_file().unwrap(), "song.mp3");
    }

    #[test]
    fn test_decode_too_few_fields() {
        for line in ["", "127.0.0.1:5000", "127.0.0.1:5000 3\n"] {
            assert!(matches!(
                Message::decode(line),
                Err(P2PError::MalformedMessage(_))
            ));
        }
    }

    #[test]
    fn test_decode_invalid_clock() {
        for clock in ["abc", "-1", "+4", "1.5", "99999999999999999999999"] {
            let line = format!("127.0.0.1:5000 {} HELLO\n", clock);
            assert!(
                matches!(Message::decode(&line), Err(P2PError::InvalidClock(_))),
                "clock {}",
                clock
            );
        }
    }

    #[test]
    fn test_decode_bad_origin_and_type() {
        assert!(matches!(
            Message::decode("nowhere 1 HELLO\n"),
            Err(P2PError::MalformedMessage(_))
        ));
        assert!(matches!(
            Message::decode("127.0.0.1:5000 1 PING\n"),
            Err(P2PError::UnknownMessageType(_))
        ));
    }

    #[test]
    fn test_peer_list_args_follow_registry_order() {
        let records = vec![
            PeerRecord {
                identity: PeerIdentity::new("X", 1),
                state: PeerState::Online,
                last_known_clock: 7,
            },
            PeerRecord {
                identity: PeerIdentity::new("Y", 2),
                state: PeerState::Offline,
                last_known_clock: 2,
            },
        ];
        let msg = Message::peer_list(origin(), 9, &records);
        assert_eq!(msg.args, vec!["2", "X:1:ONLINE:7", "Y:2:OFFLINE:2"]);

        let entries = msg.peer_entries().unwrap();
        assert_eq!(entries[0].identity, PeerIdentity::new("X", 1));
        assert_eq!(entries[0].state, PeerState::Online);
        assert_eq!(entries[1].clock, 2);
    }

    #[test]
    fn test_empty_peer_list() {
        let msg = Message::peer_list(origin(), 1, &[]);
        assert_eq!(msg.args, vec!["0"]);
        assert!(msg.peer_entries().unwrap().is_empty());
    }

    #[test]
    fn test_count_mismatch_is_reported() {
        let msg = Message::decode("127.0.0.1:5000 3 PEER_LIST 3 a:1:ONLINE:1\n").unwrap();
        match msg.peer_entries() {
            Err(P2PError::PayloadCountMismatch { declared, actual }) => {
                assert_eq!((declared, actual), (3, 1));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_peer_tuple() {
        let msg = Message::decode("127.0.0.1:5000 3 PEER_LIST 1 a:1:SLEEPING:1\n").unwrap();
        assert!(matches!(msg.peer_entries(), Err(P2PError::InvalidPayload(_))));
    }

    #[test]
    fn test_ls_entries_split_on_last_colon() {
        let msg = Message::decode("127.0.0.1:5000 3 LS_LIST 2 a.txt:5 weird:name:10\n").unwrap();
        let entries = msg.ls_entries().unwrap();
        assert_eq!(entries[0], FileEntry { name: "a.txt".into(), size: 5 });
        assert_eq!(entries[1], FileEntry { name: "weird:name".into(), size: 10 });
    }

    #[test]
    fn test_file_payload_round_trip() {
        let msg = Message::file(origin(), 5, "hello.txt", b"hello");
        assert_eq!(msg.args[3], "aGVsbG8=");

        let decoded = Message::decode(&msg.encode()).unwrap();
        let payload = decoded.file_payload().unwrap();
        assert_eq!(payload.name, "hello.txt");
        assert_eq!(payload.data, b"hello");
    }

    #[test]
    fn test_empty_file_payload() {
        let msg = Message::file(origin(), 5, "empty", b"");
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert!(decoded.file_payload().unwrap().data.is_empty());
    }

    #[test]
    fn test_payload_accessor_checks_type() {
        let msg = Message::hello(origin(), 1);
        assert!(matches!(msg.file_payload(), Err(P2PError::InvalidPayload(_))));
        assert!(matches!(msg.peer_entries(), Err(P2PError::InvalidPayload(_))));
    }
}
