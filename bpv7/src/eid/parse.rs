use super::*;

impl std::str::FromStr for Eid {
    type Err = EidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, ssp)) = s.split_once(':') else {
            return Err(EidError::MissingScheme);
        };
        match scheme {
            "dtn" => parse_dtn_ssp(ssp),
            "ipn" => parse_ipn_ssp(ssp),
            _ => Err(EidError::UnsupportedScheme(scheme.to_string())),
        }
    }
}

fn parse_dtn_ssp(ssp: &str) -> Result<Eid, EidError> {
    if ssp == "none" {
        return Ok(Eid::Null);
    }
    if !ssp.is_ascii() {
        return Err(EidError::NonAscii);
    }
    let Some(hier) = ssp.strip_prefix("//") else {
        return Err(EidError::InvalidSsp(ssp.to_string()));
    };

    let mut parts = hier.split('/');
    let node = parts.next().unwrap_or_default();
    if node.is_empty() {
        return Err(EidError::EmptyNodeName);
    }

    // A trailing slash yields one empty segment; drop it so `dtn://x/` and
    // `dtn://x` are the same endpoint.
    let demux = parts
        .filter(|p| !p.is_empty())
        .map(Box::from)
        .collect::<Box<[Box<str>]>>();

    Ok(Eid::Dtn {
        node: node.into(),
        demux,
    })
}

fn parse_ipn_ssp(ssp: &str) -> Result<Eid, EidError> {
    let Some((node, service)) = ssp.split_once('.') else {
        return Err(EidError::InvalidSsp(ssp.to_string()));
    };
    Ok(Eid::Ipn {
        node: node.parse()?,
        service: service.parse()?,
    })
}
