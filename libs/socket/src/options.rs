use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::pipeline::Taps;

/// Socket behaviour that can be loaded from configuration
///
/// The transport itself is supplied on the [`SocketBuilder`](crate::SocketBuilder).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketOptions {
    /// Print unknown packets to stderr
    pub debug: bool,
    /// Report raw bytes read and written
    pub dump_raw_traffic: bool,
    /// Report decoded packets read and written
    pub dump_decoded_traffic: bool,
    /// How higher layers should render payload bytes
    pub default_encoding: Encoding,
}

impl SocketOptions {
    pub fn taps(&self) -> Taps {
        Taps {
            raw: self.dump_raw_traffic,
            decoded: self.dump_decoded_traffic,
        }
    }
}

/// Byte encoding for payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Keep payloads as raw bytes
    #[default]
    None,
    Utf8,
    Latin1,
    Hex,
}

impl Encoding {
    /// Render bytes as text, or `None` when payloads stay binary
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Encoding::None => None,
            Encoding::Utf8 => Some(String::from_utf8_lossy(bytes).into_owned()),
            Encoding::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
            Encoding::Hex => Some(bytes.iter().fold(
                String::with_capacity(bytes.len() * 2),
                |mut out, b| {
                    let _ = write!(out, "{b:02x}");
                    out
                },
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_everything() {
        let options = SocketOptions::default();
        assert!(!options.debug);
        assert_eq!(options.taps(), Taps::default());
        assert_eq!(options.default_encoding, Encoding::None);
    }

    #[test]
    fn loads_partial_configuration() {
        let options: SocketOptions = serde_json::from_str(
            r#"{ "dump_raw_traffic": true, "default_encoding": "utf8" }"#,
        )
        .unwrap();

        assert!(options.dump_raw_traffic);
        assert!(!options.dump_decoded_traffic);
        assert_eq!(
            options.taps(),
            Taps {
                raw: true,
                decoded: false
            }
        );
        assert_eq!(options.default_encoding, Encoding::Utf8);
    }

    #[test]
    fn encodings_render_payloads() {
        let bytes = [0x68, 0x69, 0xe9];
        assert_eq!(Encoding::None.decode(&bytes), None);
        assert_eq!(Encoding::Utf8.decode(&bytes[..2]).as_deref(), Some("hi"));
        assert_eq!(Encoding::Latin1.decode(&bytes).as_deref(), Some("hié"));
        assert_eq!(Encoding::Hex.decode(&bytes).as_deref(), Some("6869e9"));
    }
}
