//! Wire format of the ICMP probe payload (spec §4.3). Bit-exact layout is
//! load-bearing: a peer ToR's linkmgrd must classify our probes the same way.

use uuid::Uuid;

/// Network-byte-order constant identifying a linkmgrd probe payload ('Gemi').
pub const COOKIE: u32 = 0x4765_6d69;
pub const VERSION: u32 = 0;
pub const COMMAND_NONE: u32 = 0;

pub const PAYLOAD_LEN: usize = 4 + 4 + 4 + 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    pub cookie: u32,
    pub version: u32,
    pub command: u32,
    pub guid: [u8; 16],
}

impl Payload {
    pub fn new(guid: Uuid) -> Self {
        Self {
            cookie: COOKIE,
            version: VERSION,
            command: COMMAND_NONE,
            guid: *guid.as_bytes(),
        }
    }

    pub fn to_bytes(self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        out[0..4].copy_from_slice(&self.cookie.to_be_bytes());
        out[4..8].copy_from_slice(&self.version.to_be_bytes());
        out[8..12].copy_from_slice(&self.command.to_be_bytes());
        out[12..28].copy_from_slice(&self.guid);
        out
    }

    /// Returns `None` on truncation; malformed-but-full-length payloads are
    /// still parsed (classification, not parsing, decides Self/Peer/Unknown).
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < PAYLOAD_LEN {
            return None;
        }
        let cookie = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
        let version = u32::from_be_bytes(bytes[4..8].try_into().ok()?);
        let command = u32::from_be_bytes(bytes[8..12].try_into().ok()?);
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&bytes[12..28]);
        Some(Self {
            cookie,
            version,
            command,
            guid,
        })
    }

    fn matches_header(&self) -> bool {
        self.cookie == COOKIE && self.version == VERSION
    }
}

/// Classification of one inbound frame's payload against this process's own GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Classification {
    /// We are hearing our own echoes looped back: the peer ToR has quiesced.
    SelfEcho,
    /// We hear the peer ToR's probes: the peer is active.
    Peer,
    /// Header mismatch, truncation, or bad checksum.
    Unknown,
}

pub fn classify(received: Option<&Payload>, own_guid: &Uuid) -> Classification {
    match received {
        Some(payload) if payload.matches_header() && payload.guid == *own_guid.as_bytes() => {
            Classification::SelfEcho
        }
        Some(payload) if payload.matches_header() => Classification::Peer,
        _ => Classification::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bit_exact() {
        let guid = Uuid::new_v4();
        let payload = Payload::new(guid);
        let bytes = payload.to_bytes();
        let parsed = Payload::from_bytes(&bytes).expect("full-length payload parses");
        assert_eq!(parsed, payload);
        assert_eq!(parsed.cookie, COOKIE);
        assert_eq!(parsed.version, VERSION);
    }

    #[test]
    fn truncated_bytes_fail_to_parse() {
        let guid = Uuid::new_v4();
        let bytes = Payload::new(guid).to_bytes();
        assert!(Payload::from_bytes(&bytes[..PAYLOAD_LEN - 1]).is_none());
    }

    #[test]
    fn classify_distinguishes_self_peer_and_unknown() {
        let own = Uuid::new_v4();
        let peer = Uuid::new_v4();
        assert_eq!(
            classify(Some(&Payload::new(own)), &own),
            Classification::SelfEcho
        );
        assert_eq!(
            classify(Some(&Payload::new(peer)), &own),
            Classification::Peer
        );
        let mut bad = Payload::new(own);
        bad.cookie = 0xdead_beef;
        assert_eq!(classify(Some(&bad), &own), Classification::Unknown);
        assert_eq!(classify(None, &own), Classification::Unknown);
    }
}
