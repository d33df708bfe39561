//! Selector parser
//!
//! ```text
//! {mediaType="text/plain", tag=~"face|secure"}
//! name{tag!=""}            leading metric name is accepted and ignored
//! ""  or  {}               no matchers
//! ```
//!
//! Values may be double-quoted (with `\" \\ \n \t` escapes), single-quoted
//! or backtick raw strings.

use crate::label::matcher::{MatchType, Matcher};
use crate::storage::error::{StorageError, StorageResult};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, opt, recognize, value},
    multi::separated_list0,
    sequence::{delimited, pair, tuple},
    IResult,
};

const METRIC_NAME_LABEL: &str = "__name__";

/// Parse a selector into matchers, dropping `__name__` matchers
pub fn parse_selector(input: &str) -> StorageResult<Vec<Matcher>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let raw = match parse_full_selector(input) {
        Ok((remaining, raw)) if remaining.trim().is_empty() => raw,
        Ok((remaining, _)) => {
            return Err(StorageError::InvalidMatcher(format!(
                "unexpected input after selector: '{}'",
                remaining.trim()
            )))
        }
        Err(e) => return Err(StorageError::InvalidMatcher(format!("parse error: {:?}", e))),
    };

    raw.into_iter()
        .filter(|(name, _, _)| name != METRIC_NAME_LABEL)
        .map(|(name, kind, value)| Matcher::new(kind, name, value))
        .collect()
}

/// `{m1,m2}` form of a matcher list
pub fn format_selector(matchers: &[Matcher]) -> String {
    let parts: Vec<String> = matchers.iter().map(|m| m.to_string()).collect();
    format!("{{{}}}", parts.join(","))
}

type RawMatcher = (String, MatchType, String);

fn parse_full_selector(input: &str) -> IResult<&str, Vec<RawMatcher>> {
    let (input, _) = multispace0(input)?;
    let (input, _) = opt(parse_label_name)(input)?;
    let (input, _) = multispace0(input)?;
    let (input, matchers) = opt(delimited(
        pair(char('{'), multispace0),
        separated_list0(
            delimited(multispace0, char(','), multispace0),
            parse_matcher,
        ),
        tuple((multispace0, opt(char(',')), multispace0, char('}'))),
    ))(input)?;
    Ok((input, matchers.unwrap_or_default()))
}

fn parse_matcher(input: &str) -> IResult<&str, RawMatcher> {
    let (input, name) = parse_label_name(input)?;
    let (input, _) = multispace0(input)?;
    let (input, kind) = parse_match_type(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = parse_string(input)?;
    Ok((input, (name.to_string(), kind, value)))
}

fn parse_label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn parse_match_type(input: &str) -> IResult<&str, MatchType> {
    alt((
        value(MatchType::Regexp, tag("=~")),
        value(MatchType::NotRegexp, tag("!~")),
        value(MatchType::NotEqual, tag("!=")),
        value(MatchType::Equal, tag("=")),
    ))(input)
}

fn parse_string(input: &str) -> IResult<&str, String> {
    alt((
        parse_double_quoted,
        map(
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            String::from,
        ),
        map(
            delimited(char('`'), take_while(|c| c != '`'), char('`')),
            String::from,
        ),
    ))(input)
}

fn parse_double_quoted(input: &str) -> IResult<&str, String> {
    let (mut input, _) = char('"')(input)?;
    let mut out = String::new();
    loop {
        if let Ok((rest, chunk)) = is_not::<_, _, nom::error::Error<&str>>("\\\"")(input) {
            out.push_str(chunk);
            input = rest;
        }
        if let Ok((rest, _)) = char::<_, nom::error::Error<&str>>('"')(input) {
            return Ok((rest, out));
        }
        let (rest, _) = char('\\')(input)?;
        let (rest, escaped) = alt((
            value('"', char('"')),
            value('\\', char('\\')),
            value('\n', char('n')),
            value('\t', char('t')),
        ))(rest)?;
        out.push(escaped);
        input = rest;
    }
}
