//! Minimal handshake-initiation packets used as reachability probes.
//!
//! Each probe is the first message a real client of the protocol would
//! send. A server that answers with the matching first response is taken as
//! proof that the protocol traverses the current network on that port. No
//! cryptographic state is kept: only the random identifiers are compared.

use rand::RngCore;

use smartvpn_core::VpnProtocol;

/// WireGuard handshake initiation: type, sender, ephemeral, static, timestamp, mac1, mac2.
const WG_INITIATION_LEN: usize = 148;
const WG_TYPE_INITIATION: u8 = 1;
const WG_TYPE_RESPONSE: u8 = 2;
const WG_TYPE_COOKIE_REPLY: u8 = 3;
const WG_RESPONSE_LEN: usize = 92;
const WG_COOKIE_REPLY_LEN: usize = 64;

/// `OpenVPN` opcodes live in the top five bits of the first byte.
const OVPN_OPCODE_SHIFT: u8 = 3;
const OVPN_HARD_RESET_CLIENT_V2: u8 = 7;
const OVPN_HARD_RESET_SERVER_V2: u8 = 8;
const OVPN_SESSION_ID_LEN: usize = 8;

const IKE_HEADER_LEN: usize = 28;
const IKE_SPI_LEN: usize = 8;
const IKE_VERSION_2: u8 = 0x20;
const IKE_SA_INIT: u8 = 34;
const IKE_FLAG_INITIATOR: u8 = 0x08;
const IKE_FLAG_RESPONSE: u8 = 0x20;

/// Wire format family of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    WireGuard,
    OpenVpn,
    Ikev2,
}

impl Handshake {
    pub const fn for_protocol(protocol: VpnProtocol) -> Self {
        match protocol {
            VpnProtocol::WireGuard => Self::WireGuard,
            VpnProtocol::OpenVpnUdp | VpnProtocol::OpenVpnTcp => Self::OpenVpn,
            VpnProtocol::Ikev2 => Self::Ikev2,
        }
    }

    /// A fresh initiation packet with random identifiers.
    pub fn initiation(self) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        match self {
            Self::WireGuard => {
                let mut packet = vec![0u8; WG_INITIATION_LEN];
                packet[0] = WG_TYPE_INITIATION;
                // Sender index, ephemeral key, encrypted fields and macs
                // are random. Only the sender index is checked on reply.
                rng.fill_bytes(&mut packet[4..]);
                packet
            }
            Self::OpenVpn => {
                let mut packet = Vec::with_capacity(1 + OVPN_SESSION_ID_LEN + 1 + 4);
                packet.push(OVPN_HARD_RESET_CLIENT_V2 << OVPN_OPCODE_SHIFT);
                let mut session_id = [0u8; OVPN_SESSION_ID_LEN];
                rng.fill_bytes(&mut session_id);
                packet.extend_from_slice(&session_id);
                // No acknowledgements, message packet id 0.
                packet.push(0);
                packet.extend_from_slice(&0u32.to_be_bytes());
                packet
            }
            Self::Ikev2 => {
                let mut packet = vec![0u8; IKE_HEADER_LEN];
                rng.fill_bytes(&mut packet[..IKE_SPI_LEN]);
                // Responder SPI stays zero. No payloads follow the header.
                packet[17] = IKE_VERSION_2;
                packet[18] = IKE_SA_INIT;
                packet[19] = IKE_FLAG_INITIATOR;
                #[allow(clippy::cast_possible_truncation)]
                packet[24..28].copy_from_slice(&(IKE_HEADER_LEN as u32).to_be_bytes());
                packet
            }
        }
    }

    /// Whether `response` answers `request`.
    pub fn accepts(self, request: &[u8], response: &[u8]) -> bool {
        match self {
            Self::WireGuard => wireguard_accepts(request, response),
            Self::OpenVpn => openvpn_accepts(request, response),
            Self::Ikev2 => ikev2_accepts(request, response),
        }
    }
}

fn wireguard_accepts(request: &[u8], response: &[u8]) -> bool {
    let Some(sender) = request.get(4..8) else {
        return false;
    };
    match response.first() {
        Some(&WG_TYPE_RESPONSE) if response.len() == WG_RESPONSE_LEN => {
            response.get(8..12) == Some(sender)
        }
        Some(&WG_TYPE_COOKIE_REPLY) if response.len() == WG_COOKIE_REPLY_LEN => {
            response.get(4..8) == Some(sender)
        }
        _ => false,
    }
}

fn openvpn_accepts(request: &[u8], response: &[u8]) -> bool {
    let Some(&first) = response.first() else {
        return false;
    };
    if first >> OVPN_OPCODE_SHIFT != OVPN_HARD_RESET_SERVER_V2 {
        return false;
    }
    // The reset must acknowledge ours: our session id follows the acked
    // packet ids. An unacknowledged reset may be meant for another client.
    let ack_start = 1 + OVPN_SESSION_ID_LEN;
    let Some(&acks) = response.get(ack_start) else {
        return false;
    };
    if acks == 0 {
        return false;
    }
    let remote_start = ack_start + 1 + usize::from(acks) * 4;
    let ours = request.get(1..=OVPN_SESSION_ID_LEN);
    match response.get(remote_start..remote_start + OVPN_SESSION_ID_LEN) {
        Some(remote) => ours == Some(remote),
        None => false,
    }
}

fn ikev2_accepts(request: &[u8], response: &[u8]) -> bool {
    response.len() >= IKE_HEADER_LEN
        && response[..IKE_SPI_LEN] == request[..IKE_SPI_LEN.min(request.len())]
        && response[17] & 0xF0 == IKE_VERSION_2
        && response[18] == IKE_SA_INIT
        && response[19] & IKE_FLAG_RESPONSE != 0
}

/// Prefix `payload` with its length as `OpenVPN` does over TCP.
pub fn frame_for_stream(payload: &[u8]) -> Option<Vec<u8>> {
    let len = u16::try_from(payload.len()).ok()?;
    let mut framed = Vec::with_capacity(2 + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    Some(framed)
}
