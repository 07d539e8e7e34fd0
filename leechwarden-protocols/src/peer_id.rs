//! ## leechwarden-protocols::peer_id
//! Maps BitTorrent peer IDs to client names.
//!
//! Recognised layouts, tried in order:
//! - Azureus `-XXYYYY-`: two-letter client code, four version digits
//! - Mainline `M4-3-6--`: dash-separated version numbers
//! - Shadow: one-letter client code

use std::borrow::Cow;
use std::fmt;

const UNKNOWN: &str = "Unknown";

const AZUREUS_CLIENTS: &[(&str, &str)] = &[
    ("AG", "Ares"),
    ("AR", "Ares"),
    ("AT", "Artemis"),
    ("AV", "Avicora"),
    ("AZ", "Azureus/Vuze"),
    ("BB", "BitBuddy"),
    ("BC", "BitComet"),
    ("BE", "BitTorrent SDK"),
    ("BG", "BTG"),
    ("BH", "BitZilla"),
    ("BM", "BitMagnet"),
    ("BN", "Baidu Netdisk"),
    ("BP", "BitTorrent Pro"),
    ("BR", "BitRocket"),
    ("BS", "BTSlave"),
    ("BT", "BitTorrent"),
    ("BW", "BitWombat"),
    ("BX", "Bittorrent X"),
    ("CD", "Enhanced CTorrent"),
    ("CT", "CTorrent"),
    ("DE", "Deluge"),
    ("DP", "Propagate Data Client"),
    ("EB", "EBit"),
    ("FC", "FileCroc"),
    ("FD", "Free Download Manager"),
    ("FG", "FlashGet"),
    ("FL", "Flud"),
    ("FT", "FoxTorrent"),
    ("FW", "FrostWire"),
    ("FX", "Freebox"),
    ("GS", "GSTorrent"),
    ("HK", "Hekate"),
    ("HL", "Halite"),
    ("HN", "Hydranode"),
    ("HP", "HP Play"),
    ("KG", "KGet"),
    ("KT", "KTorrent"),
    ("LC", "LeechCraft"),
    ("LH", "LH-ABC"),
    ("LP", "Lphant"),
    ("LT", "libtorrent"),
    ("LW", "LimeWire"),
    ("Lr", "LibTorrent (Rasterbar)"),
    ("MG", "MediaGet"),
    ("MK", "Meerkat"),
    ("ML", "MLDonkey"),
    ("MO", "MonoTorrent"),
    ("MP", "MooPolice"),
    ("MR", "Miro"),
    ("MT", "Moonlight Torrent"),
    ("NB", "Net::BitTorrent"),
    ("NX", "Net Transport"),
    ("OS", "OneSwarm"),
    ("OT", "OmegaTorrent"),
    ("PD", "Pando"),
    ("PI", "PicoTorrent"),
    ("QD", "QQDownload"),
    ("QT", "Qt 4 Torrent example"),
    ("RS", "Rufus"),
    ("RT", "Retriever"),
    ("RZ", "RezTorrent"),
    ("SB", "Swiftbit"),
    ("SD", "Xunlei"),
    ("SM", "SoMud"),
    ("SN", "ShareNet"),
    ("SP", "BitSpirit"),
    ("SS", "SwarmScope"),
    ("ST", "SymTorrent"),
    ("SZ", "Shareaza"),
    ("TB", "Torch Browser"),
    ("TE", "Tribler"),
    ("TL", "Tribler"),
    ("TN", "TorrentDotNET"),
    ("TR", "Transmission"),
    ("TS", "TorrentStorm"),
    ("TT", "TuoTu"),
    ("UL", "uLeecher"),
    ("UM", "uTorrent Mac"),
    ("UT", "uTorrent"),
    ("UW", "uTorrent Web"),
    ("VG", "Vagaa"),
    ("WD", "WebTorrent Desktop"),
    ("WT", "BitLet"),
    ("WW", "WebTorrent"),
    ("WY", "FireTorrent"),
    ("XC", "Xtorrent"),
    ("XF", "Xfplay"),
    ("XL", "Xunlei"),
    ("XT", "Xtorrent"),
    ("XX", "Xtorrent"),
    ("XY", "Xunlei"),
    ("XZ", "Xunlei"),
    ("ZP", "ZipTorrent"),
    ("ZT", "ZipTorrent"),
    ("ZZ", "ZipTorrent"),
    ("qB", "qBittorrent"),
];

const SHADOW_CLIENTS: &[(u8, &str)] = &[
    (b'A', "ABC"),
    (b'M', "BitTorrent Mainline"),
    (b'O', "Osprey"),
    (b'Q', "BTQueue"),
    (b'R', "Tribler"),
    (b'S', "Shad0w"),
    (b'T', "BitTornado"),
    (b'U', "UPnP NAT Bit Torrent"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: &'static str,
    /// Empty when the layout carries no usable version.
    pub version: String,
}

impl ClientInfo {
    fn named(name: &'static str) -> Self {
        Self {
            name,
            version: String::new(),
        }
    }

    /// Decodes a peer ID as reported by aria2 (percent-encoded, binary-safe).
    pub fn parse(peer_id: &str) -> Self {
        let raw: Cow<'_, [u8]> = if peer_id.contains('%') {
            urlencoding::decode_binary(peer_id.as_bytes())
        } else {
            Cow::Borrowed(peer_id.as_bytes())
        };

        parse_azureus(&raw)
            .or_else(|| parse_mainline(&raw))
            .or_else(|| parse_shadow(&raw))
            .unwrap_or_else(|| Self::named(UNKNOWN))
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            f.write_str(self.name)
        } else {
            write!(f, "{} {}", self.name, self.version)
        }
    }
}

pub fn client_name(peer_id: &str) -> &'static str {
    ClientInfo::parse(peer_id).name
}

/// `"<name> <version>"`, or just the name when no version is known.
pub fn name_with_version(peer_id: &str) -> String {
    ClientInfo::parse(peer_id).to_string()
}

fn parse_azureus(raw: &[u8]) -> Option<ClientInfo> {
    if raw.len() < 8 || raw[0] != b'-' {
        return None;
    }
    let code = std::str::from_utf8(&raw[1..3]).ok()?;
    let name = AZUREUS_CLIENTS
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, name)| *name)?;
    Some(ClientInfo {
        name,
        version: format_version(&String::from_utf8_lossy(&raw[3..7])),
    })
}

/// `M4-3-6--` and `M7-10-2-` style: up to three dash-terminated numbers.
fn parse_mainline(raw: &[u8]) -> Option<ClientInfo> {
    let rest = raw.strip_prefix(b"M")?;
    let mut parts = Vec::with_capacity(3);
    let mut rest = rest;
    for _ in 0..3 {
        let end = rest.iter().position(|b| *b == b'-')?;
        let digits = &rest[..end];
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        parts.push(String::from_utf8_lossy(digits).into_owned());
        rest = &rest[end + 1..];
    }
    Some(ClientInfo {
        name: "BitTorrent Mainline",
        version: parts.join("."),
    })
}

fn parse_shadow(raw: &[u8]) -> Option<ClientInfo> {
    let first = *raw.first()?;
    SHADOW_CLIENTS
        .iter()
        .find(|(code, _)| *code == first)
        .map(|(_, name)| ClientInfo::named(name))
}

/// `XXYY` digits to `major.minor`: `0213` → `2.13`, `5120` → `51.20`,
/// `0200` → `2`. Anything without a non-zero major comes back unchanged.
pub fn format_version(raw: &str) -> String {
    if raw.len() < 4 || !raw.is_char_boundary(2) || !raw.is_char_boundary(4) {
        return raw.to_string();
    }
    let (major, minor) = (&raw[..2], &raw[2..4]);
    let number = |part: &str| {
        part.chars()
            .filter_map(|c| c.to_digit(10))
            .fold(0u32, |acc, d| acc * 10 + d)
    };

    match (number(major), number(minor)) {
        (0, _) => raw.to_string(),
        (_, 0) => major.trim_start_matches('0').to_string(),
        _ => format!(
            "{}.{}",
            major.trim_start_matches('0'),
            minor.trim_start_matches('0')
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_encoded_bitcomet() {
        let info = ClientInfo::parse("%2DBC0213%2D%00H%E7%93%28%0C%2A%5EGr%EA%86");
        assert_eq!(info.name, "BitComet");
        assert_eq!(info.version, "2.13");
    }

    #[test]
    fn azureus_clients() {
        let cases = [
            ("-qB5120-ME_GpvJS-s49", "qBittorrent"),
            ("-TR2940-xxxxxxxxxxxx", "Transmission"),
            ("-UT3456-xxxxxxxxxxxx", "uTorrent"),
            ("-DE1234-xxxxxxxxxxxx", "Deluge"),
            ("-XL0012-xxxxxxxxxxxx", "Xunlei"),
            ("%2DqB5120%2DME_GpvJS-s49", "qBittorrent"),
        ];
        for (peer_id, expected) in cases {
            assert_eq!(client_name(peer_id), expected, "peer id {peer_id}");
        }
    }

    #[test]
    fn names_with_versions() {
        let cases = [
            ("-qB5120-ME_GpvJS-s49", "qBittorrent 51.20"),
            ("-BC0213-xxxxxxxxxxxx", "BitComet 2.13"),
            ("-TR2940-xxxxxxxxxxxx", "Transmission 29.40"),
            ("unknown-format", "Unknown"),
            ("M4-3-6--xxxxxxxxxxxx", "BitTorrent Mainline 4.3.6"),
            ("M7-10-2-xxxxxxxxxxxx", "BitTorrent Mainline 7.10.2"),
        ];
        for (peer_id, expected) in cases {
            assert_eq!(name_with_version(peer_id), expected, "peer id {peer_id}");
        }
    }

    #[test]
    fn shadow_style_has_no_version() {
        let info = ClientInfo::parse("S58B-----xxxxxxxxxxx");
        assert_eq!(info.name, "Shad0w");
        assert!(info.version.is_empty());

        // Malformed mainline falls back to the one-letter table.
        assert_eq!(name_with_version("Mxyz"), "BitTorrent Mainline");
    }

    #[test]
    fn unknown_code_and_short_ids() {
        assert_eq!(client_name("-ZQ1234-xxxxxxxxxxxx"), "Unknown");
        assert_eq!(client_name("-qB51"), "Unknown");
        assert_eq!(client_name(""), "Unknown");
    }

    #[test]
    fn version_formatting() {
        assert_eq!(format_version("0213"), "2.13");
        assert_eq!(format_version("5120"), "51.20");
        assert_eq!(format_version("0200"), "2");
        assert_eq!(format_version("0012"), "0012");
        assert_eq!(format_version("12"), "12");
    }
}
