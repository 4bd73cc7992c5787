mod error;
mod parse;


pub use error::EidError;

use crate::cbor;

/// An endpoint identifier.
///
/// The canonical text forms are `dtn:none`, `dtn://node/demux/parts` and
/// `ipn:node.service`. A node-only DTN EID renders without a trailing slash;
/// parsing normalizes `dtn://node/` to `dtn://node`.
#[derive(Default, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Eid {
    /// The distinguished `dtn:none` endpoint.
    #[default]
    Null,
    Dtn {
        node: Box<str>,
        demux: Box<[Box<str>]>,
    },
    Ipn {
        node: u64,
        service: u64,
    },
}

impl Eid {
    pub fn is_none(&self) -> bool {
        matches!(self, Eid::Null)
    }

    /// The node part, without scheme or demux: `dtn://n1/x` → `n1`,
    /// `ipn:3.42` → `3`.
    pub fn node_name(&self) -> Option<String> {
        match self {
            Eid::Null => None,
            Eid::Dtn { node, .. } => Some(node.to_string()),
            Eid::Ipn { node, .. } => Some(node.to_string()),
        }
    }

    /// A node-id EID for the same node, demux stripped.
    pub fn node_id(&self) -> Eid {
        match self {
            Eid::Null => Eid::Null,
            Eid::Dtn { node, .. } => Eid::Dtn {
                node: node.clone(),
                demux: Box::new([]),
            },
            Eid::Ipn { node, .. } => Eid::Ipn {
                node: *node,
                service: 0,
            },
        }
    }

    /// True if this EID may be used as a match pattern: a pattern must not
    /// combine the `/*` wildcard with a `/~` group demux, and only a final
    /// `*` segment is treated as a wildcard.
    pub fn is_valid_pattern(&self) -> bool {
        let Eid::Dtn { demux, .. } = self else {
            return true;
        };
        let has_wildcard = demux.last().map(|s| &**s == "*").unwrap_or(false);
        let has_group = demux.iter().any(|s| s.starts_with('~'));
        !(has_wildcard && has_group)
    }

    /// Group-endpoint and wildcard matching.
    ///
    /// - A pattern whose final demux segment is `*` prefix-matches.
    /// - A pattern containing a `~group` segment matches any endpoint with
    ///   the same node and the same demux up to and including the group.
    /// - `dtn:none` matches nothing and is matched by nothing.
    pub fn matches_pattern(&self, pattern: &Eid) -> bool {
        if self.is_none() || pattern.is_none() {
            return false;
        }
        if self == pattern {
            return true;
        }
        let (Eid::Dtn { node, demux }, Eid::Dtn { node: pnode, demux: pdemux }) = (self, pattern)
        else {
            return false;
        };
        if node != pnode {
            return false;
        }

        if pdemux.last().map(|s| &**s == "*").unwrap_or(false) {
            let prefix = &pdemux[..pdemux.len() - 1];
            return demux.len() >= prefix.len() && demux[..prefix.len()] == *prefix;
        }

        if let Some(group_at) = pdemux.iter().position(|s| s.starts_with('~')) {
            return demux.len() > group_at && demux[..=group_at] == pdemux[..=group_at];
        }

        false
    }

    pub(crate) fn emit_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array(2);
        match self {
            Eid::Null => {
                encoder.emit_uint(1);
                encoder.emit_uint(0);
            }
            Eid::Dtn { node, demux } => {
                encoder.emit_uint(1);
                let mut ssp = format!("//{node}");
                for part in demux {
                    ssp.push('/');
                    ssp.push_str(part);
                }
                encoder.emit_text(&ssp);
            }
            Eid::Ipn { node, service } => {
                encoder.emit_uint(2);
                encoder.emit_array(2);
                encoder.emit_uint(*node);
                encoder.emit_uint(*service);
            }
        }
    }

    pub(crate) fn parse_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, EidError> {
        decoder.parse_array()?;
        match decoder.parse_uint()? {
            1 => {
                // dtn scheme: either the uint 0 (dtn:none) or an ssp string
                if decoder.peek_major()? == 3 {
                    let ssp = decoder.parse_text()?;
                    format!("dtn:{ssp}").parse()
                } else {
                    match decoder.parse_uint()? {
                        0 => Ok(Eid::Null),
                        n => Err(EidError::InvalidSsp(n.to_string())),
                    }
                }
            }
            2 => {
                decoder.parse_array()?;
                let node = decoder.parse_uint()?;
                let service = decoder.parse_uint()?;
                Ok(Eid::Ipn { node, service })
            }
            scheme => Err(EidError::UnsupportedScheme(scheme.to_string())),
        }
    }
}

impl std::fmt::Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Eid::Null => write!(f, "dtn:none"),
            Eid::Dtn { node, demux } => {
                write!(f, "dtn://{node}")?;
                for part in demux {
                    write!(f, "/{part}")?;
                }
                Ok(())
            }
            Eid::Ipn { node, service } => write!(f, "ipn:{node}.{service}"),
        }
    }
}

impl std::fmt::Debug for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}
