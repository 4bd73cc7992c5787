use super::StaticRoute;
use winnow::{
    ModalResult, Parser,
    ascii::{Caseless, dec_uint, line_ending, space0, space1, till_line_ending},
    combinator::{alt, opt, separated},
    stream::AsChar,
    token::{rest, take_till},
};

fn parse_index(input: &mut &[u8]) -> ModalResult<u32> {
    ('#', dec_uint).map(|(_, v)| v).parse_next(input)
}

fn parse_word(input: &mut &[u8]) -> ModalResult<String> {
    take_till(1.., AsChar::is_space)
        .map(|s: &[u8]| String::from_utf8_lossy(s).into_owned())
        .parse_next(input)
}

fn parse_via(input: &mut &[u8]) -> ModalResult<mule_bpv7::eid::Eid> {
    (Caseless("via"), space1, parse_word.try_map(|s| s.parse()))
        .map(|(_, _, v)| v)
        .parse_next(input)
}

fn parse_route(input: &mut &[u8]) -> ModalResult<StaticRoute> {
    (
        parse_index,
        space1,
        parse_word,
        space1,
        parse_word,
        space1,
        parse_via,
    )
        .map(
            |(index, _, source_pattern, _, destination_pattern, _, via)| StaticRoute {
                index,
                source_pattern,
                destination_pattern,
                via,
            },
        )
        .parse_next(input)
}

fn parse_line(input: &mut &[u8]) -> ModalResult<Option<StaticRoute>> {
    alt((
        ("//", rest).map(|_| None),
        (space0, opt(parse_route), space0).map(|(_, v, _)| v),
    ))
    .parse_next(input)
}

fn parse_lines(input: &mut &[u8]) -> ModalResult<Vec<StaticRoute>> {
    separated(0.., till_line_ending.and_then(parse_line), line_ending)
        .map(|v: Vec<Option<StaticRoute>>| v.into_iter().flatten().collect())
        .parse_next(input)
}

pub fn parse_routes(input: &[u8]) -> Result<Vec<StaticRoute>, String> {
    parse_lines.parse(input).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_route() {
        let routes = parse_routes(b"#10 * dtn://node3/* via dtn://node1").expect("Failed");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].index, 10);
        assert_eq!(routes[0].source_pattern, "*");
        assert_eq!(routes[0].destination_pattern, "dtn://node3/*");
        assert_eq!(routes[0].via.to_string(), "dtn://node1");
    }

    #[test]
    fn comments_and_blanks() {
        parse_routes(b"").expect("Failed");
        parse_routes(b"\n").expect("Failed");
        parse_routes(b"   \n   \n   ").expect("Failed");
        parse_routes(b"// just a comment\n").expect("Failed");

        let routes = parse_routes(
            b"// primary path\n#10 * dtn://node3/* via dtn://node1\n\n#20 dtn://n?/app * via ipn:4.0\n",
        )
        .expect("Failed");
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[1].via.to_string(), "ipn:4.0");
    }

    #[test]
    fn garbage_rejected() {
        assert!(parse_routes(b"#x nope").is_err());
        assert!(parse_routes(b"#10 * dtn://node3/* via not-an-eid").is_err());
    }
}
