//! Channel URI parsing.
//!
//! Grammar:
//! - `aeron:udp?key=value(|key=value)*`
//! - `aeron:ipc` with optional `?key=value(|key=value)*`
//! - `aeron-spy:<inner-uri>` marks a spy subscription on a local publication
//!
//! Recognized keys: `endpoint`, `control`, `reliable`, `mtu`, `term-length`,
//! `init-term-id`, `term-id`, `term-offset`, `session-id`, `tags`. Unknown
//! keys are ignored so newer clients can talk to older drivers.

use thiserror::Error;

const URI_PREFIX: &str = "aeron:";
const SPY_PREFIX: &str = "aeron-spy:";

#[derive(Debug, Error)]
pub enum ChannelUriError {
    #[error("channel must start with '{URI_PREFIX}': {uri}")]
    MissingPrefix { uri: String },

    #[error("unknown media '{media}' in channel: {uri}")]
    UnknownMedia { media: String, uri: String },

    #[error("malformed parameter '{param}' in channel: {uri}")]
    MalformedParam { param: String, uri: String },

    #[error("invalid value '{value}' for '{key}' in channel: {uri}")]
    InvalidValue {
        key: String,
        value: String,
        uri: String,
    },

    #[error("udp channel requires an endpoint or control address: {uri}")]
    MissingEndpoint { uri: String },
}

/// Transport media for a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Media {
    Udp,
    Ipc,
}

/// Parsed and normalized channel descriptor.
///
/// Two descriptors are canonically equal iff all normalized fields match;
/// endpoint registries key on [`ChannelDescriptor::canonical_key`], which
/// covers only the fields that select an endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub media: Media,
    /// Set when the URI carried the `aeron-spy:` prefix. A spy never opens a
    /// receive endpoint; it attaches to a co-located publication's log.
    pub spy: bool,
    pub endpoint: Option<String>,
    pub control: Option<String>,
    pub reliable: bool,
    pub mtu: Option<u32>,
    pub term_length: Option<u32>,
    pub initial_term_id: Option<i32>,
    pub term_id: Option<i32>,
    pub term_offset: Option<u32>,
    pub session_id: Option<i32>,
    pub tags: Option<String>,
}

impl ChannelDescriptor {
    /// Parse a channel URI into a descriptor.
    pub fn parse(uri: &str) -> Result<Self, ChannelUriError> {
        let (spy, rest) = match uri.strip_prefix(SPY_PREFIX) {
            Some(inner) => (true, inner),
            None => (false, uri),
        };

        let Some(body) = rest.strip_prefix(URI_PREFIX) else {
            return Err(ChannelUriError::MissingPrefix {
                uri: uri.to_string(),
            });
        };

        let (media_token, params) = match body.split_once('?') {
            Some((media, params)) => (media, Some(params)),
            None => (body, None),
        };

        let media = match media_token {
            "udp" => Media::Udp,
            "ipc" => Media::Ipc,
            other => {
                return Err(ChannelUriError::UnknownMedia {
                    media: other.to_string(),
                    uri: uri.to_string(),
                });
            }
        };

        let mut descriptor = ChannelDescriptor {
            media,
            spy,
            endpoint: None,
            control: None,
            reliable: true,
            mtu: None,
            term_length: None,
            initial_term_id: None,
            term_id: None,
            term_offset: None,
            session_id: None,
            tags: None,
        };

        if let Some(params) = params {
            if params.is_empty() {
                return Err(ChannelUriError::MalformedParam {
                    param: String::new(),
                    uri: uri.to_string(),
                });
            }
            for param in params.split('|') {
                let Some((key, value)) = param.split_once('=') else {
                    return Err(ChannelUriError::MalformedParam {
                        param: param.to_string(),
                        uri: uri.to_string(),
                    });
                };
                if key.is_empty() || value.is_empty() {
                    return Err(ChannelUriError::MalformedParam {
                        param: param.to_string(),
                        uri: uri.to_string(),
                    });
                }
                descriptor.apply_param(key, value, uri)?;
            }
        }

        if media == Media::Udp && descriptor.endpoint.is_none() && descriptor.control.is_none() {
            return Err(ChannelUriError::MissingEndpoint {
                uri: uri.to_string(),
            });
        }

        Ok(descriptor)
    }

    fn apply_param(&mut self, key: &str, value: &str, uri: &str) -> Result<(), ChannelUriError> {
        match key {
            "endpoint" => self.endpoint = Some(value.to_ascii_lowercase()),
            "control" => self.control = Some(value.to_ascii_lowercase()),
            "reliable" => {
                self.reliable = match value {
                    "true" => true,
                    "false" => false,
                    _ => return Err(invalid_value(key, value, uri)),
                }
            }
            "mtu" => self.mtu = Some(parse_number(key, value, uri)?),
            "term-length" => self.term_length = Some(parse_number(key, value, uri)?),
            "init-term-id" => self.initial_term_id = Some(parse_number(key, value, uri)?),
            "term-id" => self.term_id = Some(parse_number(key, value, uri)?),
            "term-offset" => self.term_offset = Some(parse_number(key, value, uri)?),
            "session-id" => self.session_id = Some(parse_number(key, value, uri)?),
            "tags" => self.tags = Some(value.to_string()),
            _ => {} // unknown keys are ignored
        }
        Ok(())
    }

    pub fn is_udp(&self) -> bool {
        self.media == Media::Udp
    }

    pub fn is_ipc(&self) -> bool {
        self.media == Media::Ipc
    }

    /// Key selecting the channel endpoint this descriptor maps to. Stream
    /// parameters (mtu, term geometry, session) do not participate.
    pub fn canonical_key(&self) -> String {
        match self.media {
            Media::Ipc => "ipc".to_string(),
            Media::Udp => {
                let mut key = String::from("udp");
                if let Some(endpoint) = &self.endpoint {
                    key.push_str("?endpoint=");
                    key.push_str(endpoint);
                }
                if let Some(control) = &self.control {
                    key.push(if self.endpoint.is_some() { '|' } else { '?' });
                    key.push_str("control=");
                    key.push_str(control);
                }
                key
            }
        }
    }

    /// True when all three replay parameters are present. `term-length` must
    /// accompany them so the position arithmetic is defined.
    pub fn has_replay_params(&self) -> bool {
        self.initial_term_id.is_some() && self.term_id.is_some() && self.term_offset.is_some()
    }
}

fn invalid_value(key: &str, value: &str, uri: &str) -> ChannelUriError {
    ChannelUriError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        uri: uri.to_string(),
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &str,
    value: &str,
    uri: &str,
) -> Result<T, ChannelUriError> {
    value.parse().map_err(|_| invalid_value(key, value, uri))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_udp_channel() {
        let descriptor = ChannelDescriptor::parse("aeron:udp?endpoint=localhost:4000").unwrap();
        assert_eq!(descriptor.media, Media::Udp);
        assert!(!descriptor.spy);
        assert_eq!(descriptor.endpoint.as_deref(), Some("localhost:4000"));
        assert!(descriptor.reliable);
    }

    #[test]
    fn parses_ipc_without_params() {
        let descriptor = ChannelDescriptor::parse("aeron:ipc").unwrap();
        assert_eq!(descriptor.media, Media::Ipc);
        assert_eq!(descriptor.canonical_key(), "ipc");
    }

    #[test]
    fn parses_stream_params() {
        let descriptor = ChannelDescriptor::parse(
            "aeron:udp?endpoint=localhost:4000|mtu=8192|term-length=131072|init-term-id=7|term-id=11|term-offset=64",
        )
        .unwrap();
        assert_eq!(descriptor.mtu, Some(8192));
        assert_eq!(descriptor.term_length, Some(131072));
        assert_eq!(descriptor.initial_term_id, Some(7));
        assert_eq!(descriptor.term_id, Some(11));
        assert_eq!(descriptor.term_offset, Some(64));
        assert!(descriptor.has_replay_params());
    }

    #[test]
    fn spy_prefix_wraps_inner_uri() {
        let descriptor =
            ChannelDescriptor::parse("aeron-spy:aeron:udp?endpoint=localhost:4000").unwrap();
        assert!(descriptor.spy);
        assert_eq!(descriptor.canonical_key(), "udp?endpoint=localhost:4000");
    }

    #[test]
    fn endpoint_host_is_normalized() {
        let upper = ChannelDescriptor::parse("aeron:udp?endpoint=LOCALHOST:4000").unwrap();
        let lower = ChannelDescriptor::parse("aeron:udp?endpoint=localhost:4000").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.canonical_key(), lower.canonical_key());
    }

    #[test]
    fn reliable_false_parses() {
        let descriptor =
            ChannelDescriptor::parse("aeron:udp?endpoint=localhost:4000|reliable=false").unwrap();
        assert!(!descriptor.reliable);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let descriptor =
            ChannelDescriptor::parse("aeron:udp?endpoint=localhost:4000|fancy=yes").unwrap();
        assert_eq!(descriptor.endpoint.as_deref(), Some("localhost:4000"));
    }

    #[test]
    fn rejects_unknown_media() {
        assert!(matches!(
            ChannelDescriptor::parse("aeron:udp://"),
            Err(ChannelUriError::UnknownMedia { .. })
        ));
    }

    #[test]
    fn rejects_missing_prefix() {
        assert!(matches!(
            ChannelDescriptor::parse("udp?endpoint=localhost:4000"),
            Err(ChannelUriError::MissingPrefix { .. })
        ));
    }

    #[test]
    fn rejects_udp_without_endpoint() {
        assert!(matches!(
            ChannelDescriptor::parse("aeron:udp?mtu=4096"),
            Err(ChannelUriError::MissingEndpoint { .. })
        ));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ChannelDescriptor::parse("aeron:udp?endpoint=localhost:4000|reliable=maybe"),
            Err(ChannelUriError::InvalidValue { .. })
        ));
        assert!(matches!(
            ChannelDescriptor::parse("aeron:udp?endpoint=localhost:4000|mtu=big"),
            Err(ChannelUriError::InvalidValue { .. })
        ));
        assert!(matches!(
            ChannelDescriptor::parse("aeron:udp?endpoint=localhost:4000|"),
            Err(ChannelUriError::MalformedParam { .. })
        ));
    }

    #[test]
    fn control_address_selects_endpoint_key() {
        let descriptor =
            ChannelDescriptor::parse("aeron:udp?endpoint=localhost:4000|control=localhost:4001")
                .unwrap();
        assert_eq!(
            descriptor.canonical_key(),
            "udp?endpoint=localhost:4000|control=localhost:4001"
        );
    }
}
