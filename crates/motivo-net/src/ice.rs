//! Hand-rolled ICE candidate line parser (§6).
//!
//! The corpus carries no WebRTC crate, so candidate lines are parsed directly
//! against the standard `candidate-attribute` grammar (RFC 8839 §5.1):
//!
//! ```text
//! candidate:<foundation> <component> <protocol> <priority> <ip> <port> typ <type>
//!   [raddr <addr> rport <port>] [tcptype <type>]
//! ```

use motivo_proto::IceCandidate;

/// A candidate line failed to parse.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum IceParseError {
    /// The line had fewer fields than the minimal grammar requires.
    #[error("candidate line too short: {0:?}")]
    TooShort(String),
    /// The `candidate:` prefix was missing or malformed.
    #[error("missing 'candidate:' prefix")]
    MissingPrefix,
    /// A numeric field did not parse.
    #[error("invalid numeric field {field}: {value:?}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Raw value that failed to parse.
        value: String,
    },
    /// The mandatory `typ <type>` pair was missing.
    #[error("missing 'typ' field")]
    MissingType,
}

/// Parses one ICE candidate attribute line.
pub fn parse_candidate(line: &str) -> Result<IceCandidate, IceParseError> {
    let line = line.trim();
    let rest = line
        .strip_prefix("candidate:")
        .or_else(|| line.strip_prefix("a=candidate:"))
        .ok_or(IceParseError::MissingPrefix)?;

    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() < 7 {
        return Err(IceParseError::TooShort(line.to_string()));
    }

    let foundation = fields[0].to_string();
    let component = parse_u32(fields[1], "component")?;
    let protocol = fields[2].to_lowercase();
    let priority = parse_u32(fields[3], "priority")?;
    let ip = fields[4].to_string();
    let port = parse_u16(fields[5], "port")?;

    if fields[6] != "typ" || fields.len() < 8 {
        return Err(IceParseError::MissingType);
    }
    let candidate_type = fields[7].to_string();

    let mut related_address = None;
    let mut related_port = None;
    let mut tcp_type = None;
    let mut i = 8;
    while i + 1 < fields.len() + 1 && i < fields.len() {
        match fields[i] {
            "raddr" if i + 1 < fields.len() => {
                related_address = Some(fields[i + 1].to_string());
                i += 2;
            }
            "rport" if i + 1 < fields.len() => {
                related_port = Some(parse_u16(fields[i + 1], "rport")?);
                i += 2;
            }
            "tcptype" if i + 1 < fields.len() => {
                tcp_type = Some(fields[i + 1].to_string());
                i += 2;
            }
            _ => i += 1,
        }
    }

    Ok(IceCandidate {
        foundation,
        component,
        protocol,
        priority,
        ip,
        port,
        candidate_type,
        related_address,
        related_port,
        tcp_type,
    })
}

fn parse_u32(value: &str, field: &'static str) -> Result<u32, IceParseError> {
    value.parse().map_err(|_| IceParseError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn parse_u16(value: &str, field: &'static str) -> Result<u16, IceParseError> {
    value.parse().map_err(|_| IceParseError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_candidate() {
        let c = parse_candidate(
            "candidate:1 1 UDP 2130706431 192.168.1.5 54321 typ host",
        )
        .expect("parses");
        assert_eq!(c.foundation, "1");
        assert_eq!(c.component, 1);
        assert_eq!(c.protocol, "udp");
        assert_eq!(c.priority, 2_130_706_431);
        assert_eq!(c.ip, "192.168.1.5");
        assert_eq!(c.port, 54321);
        assert_eq!(c.candidate_type, "host");
        assert!(c.related_address.is_none());
    }

    #[test]
    fn parses_srflx_candidate_with_related_address() {
        let c = parse_candidate(
            "candidate:2 1 udp 1694498815 203.0.113.9 61234 typ srflx raddr 192.168.1.5 rport 54321",
        )
        .expect("parses");
        assert_eq!(c.candidate_type, "srflx");
        assert_eq!(c.related_address.as_deref(), Some("192.168.1.5"));
        assert_eq!(c.related_port, Some(54321));
    }

    #[test]
    fn parses_tcp_candidate_with_tcptype() {
        let c = parse_candidate(
            "a=candidate:3 1 tcp 1019216383 192.168.1.5 9 typ host tcptype active",
        )
        .expect("parses");
        assert_eq!(c.protocol, "tcp");
        assert_eq!(c.tcp_type.as_deref(), Some("active"));
    }

    #[test]
    fn rejects_line_missing_prefix() {
        assert_eq!(
            parse_candidate("1 1 udp 1 1.2.3.4 5 typ host"),
            Err(IceParseError::MissingPrefix)
        );
    }

    #[test]
    fn rejects_missing_typ_field() {
        let err = parse_candidate("candidate:1 1 udp 1 1.2.3.4 5").unwrap_err();
        assert!(matches!(err, IceParseError::TooShort(_)));
    }
}
